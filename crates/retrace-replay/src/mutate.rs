//! Response mutation applied to a chosen replay record before it is written
//! out: header scrubbing, dependency-driven preload pushing, and server
//! think-time delay. Grounded in `original_source/src/frontend/replayserver.cc`'s
//! `main` (cache/CORS header handling) and `populate_push_configurations`.

use retrace_core::config::{DependencyPriority, DependencyTable, ResourceType, ThinkTimeTable};
use retrace_core::message::HttpResponse;
use retrace_core::url_util::{extract_hostname, remove_trailing_slash, strip_www};

const DEPENDENCY_DELIM: &str = "|$de|";

/// spec.md §4.4 "Header scrub" plus the supplemented cache/CORS handling
/// from the original implementation (SPEC_FULL.md "Supplemented features").
/// Cache-Control always ends up `no-store`: the original's allowlist of
/// cacheable resources lived at a hardcoded path specific to the research
/// machine it ran on and does not generalize (see DESIGN.md).
pub fn scrub_cache_and_cors(response: &mut HttpResponse) {
    for name in [
        "Content-Security-Policy",
        "X-XSS-Protection",
        "allowedHeaders",
        "Access-Control-Allow-Headers",
        "Cache-control",
        "Expires",
        "Last-modified",
        "Date",
        "Age",
        "Etag",
        "Pragma",
        "kp-eealive",
    ] {
        response.headers.remove(name);
    }

    response.headers.push("Access-Control-Allow-Headers", "*");
    response.headers.push("Cache-Control", "no-store");

    if !response.headers.has("Access-Control-Allow-Origin") {
        response.headers.push("Access-Control-Allow-Origin", "*");
    }
}

/// spec.md §4.4 "Dependency push (optional)": for the page at `request_url`,
/// emit a preload `Link:` header for "Important" non-Document children
/// (`nopush` when the child's host differs from `current_loading_page`), a
/// header enumerating Important Document children (original source's
/// "important iframes", dropped from spec.md's distillation but present in
/// `original_source/`, so carried here as a supplement), and the two
/// `x-systemname-*` headers for Semi-important/Unimportant children.
pub fn populate_push_configuration(
    response: &mut HttpResponse,
    dependencies: &DependencyTable,
    request_url: &str,
    current_loading_page: &str,
) {
    let parent = remove_trailing_slash(request_url);
    let children = dependencies.children_of(parent);
    if children.is_empty() {
        return;
    }

    let mut link_resources = Vec::new();
    let mut important_iframes = Vec::new();
    let mut semi_important = Vec::new();
    let mut unimportant = Vec::new();

    for child in children {
        if child.resource_type == ResourceType::Xhr {
            continue;
        }
        match child.priority {
            DependencyPriority::Important if child.resource_type == ResourceType::Document => {
                important_iframes.push(format!("{};{}", child.url, type_label(child.resource_type)));
            }
            DependencyPriority::Important => {
                let mut entry = format!("<{}>;rel=preload{}", child.url, child.resource_type.as_link_attr());
                let child_host = strip_www(extract_hostname(&child.url));
                if child_host != current_loading_page {
                    entry.push_str(";nopush");
                }
                link_resources.push(entry);
            }
            DependencyPriority::SemiImportant => {
                semi_important.push(format!("{};{}", child.url, type_label(child.resource_type)));
            }
            DependencyPriority::Unimportant => {
                unimportant.push(format!("{};{}", child.url, type_label(child.resource_type)));
            }
        }
    }

    if !link_resources.is_empty() {
        response.headers.push("Link", link_resources.join(", "));
    }
    if !important_iframes.is_empty() {
        response
            .headers
            .push("x-systemname-important-iframes", important_iframes.join(DEPENDENCY_DELIM));
    }
    if !semi_important.is_empty() {
        response
            .headers
            .push("x-systemname-semi-important", semi_important.join(DEPENDENCY_DELIM));
    }
    if !unimportant.is_empty() {
        response
            .headers
            .push("x-systemname-unimportant", unimportant.join(DEPENDENCY_DELIM));
    }
}

fn type_label(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Image => "Image",
        ResourceType::Script => "Script",
        ResourceType::Stylesheet => "Stylesheet",
        ResourceType::Font => "Font",
        ResourceType::Xhr => "XHR",
        ResourceType::Document => "Document",
        ResourceType::Default => "DEFAULT",
    }
}

/// spec.md §4.4 "Think-time delay": the artificial delay to sleep before
/// writing the response, if `full_url` appears in the think-time table.
pub fn think_time_delay(table: &ThinkTimeTable, full_url: &str) -> Option<std::time::Duration> {
    table.delay_ms(full_url).map(std::time::Duration::from_millis)
}
