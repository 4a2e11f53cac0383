//! Offline configuration tables: the request-order reference file, the
//! prefetch list, the dependency file, and the server-think-time file.
//! All are loaded once at startup and treated as immutable thereafter.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::url_util::remove_scheme;

/// Resource type tag used by both the prefetch file and the dependency file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Image,
    Script,
    Stylesheet,
    Font,
    Xhr,
    Document,
    Default,
}

impl ResourceType {
    pub fn parse(s: &str) -> Self {
        match s {
            "Image" => ResourceType::Image,
            "Script" => ResourceType::Script,
            "Stylesheet" => ResourceType::Stylesheet,
            "Font" => ResourceType::Font,
            "XHR" => ResourceType::Xhr,
            "Document" => ResourceType::Document,
            _ => ResourceType::Default,
        }
    }

    /// `Link:` `as=` attribute fragment, e.g. `;as=image`. Per spec.md
    /// §4.3, XHR and DEFAULT resources get no `as=` attribute at all.
    pub fn as_link_attr(&self) -> &'static str {
        match self {
            ResourceType::Image => ";as=image",
            ResourceType::Stylesheet => ";as=style",
            ResourceType::Script => ";as=script",
            ResourceType::Font => ";as=font;crossorigin",
            ResourceType::Xhr | ResourceType::Document | ResourceType::Default => "",
        }
    }
}

/// Immutable map URL (scheme-stripped) -> ordinal, loaded once from the
/// request-order file (one URL per line, 0-based line index is the rank).
#[derive(Debug, Clone, Default)]
pub struct RequestOrderTable {
    ordinals: HashMap<String, u64>,
}

impl RequestOrderTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut ordinals = HashMap::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let url = line.trim();
            if url.is_empty() {
                continue;
            }
            ordinals.entry(normalize(url)).or_insert(i as u64);
        }
        Ok(Self { ordinals })
    }

    pub fn ordinal(&self, url: &str) -> Option<u64> {
        self.ordinals.get(&normalize(url)).copied()
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}

/// Immutable map URL (normalized) -> resource type, loaded from the
/// prefetch file (`<url> <resource-type> ...`, whitespace-separated, only
/// the first two tokens are used). Preserves file order for the `Link:`
/// header the serializer injects on the main page's response.
#[derive(Debug, Clone, Default)]
pub struct PrefetchSet {
    order: Vec<String>,
    kinds: HashMap<String, ResourceType>,
}

impl PrefetchSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut order = Vec::new();
        let mut kinds = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(url) = tokens.next() else { continue };
            let kind = tokens.next().map(ResourceType::parse).unwrap_or(ResourceType::Default);
            let key = normalize(url);
            if !kinds.contains_key(&key) {
                order.push(url.to_string());
            }
            kinds.insert(key, kind);
        }
        Ok(Self { order, kinds })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.kinds.contains_key(&normalize(url))
    }

    pub fn kind_of(&self, url: &str) -> Option<ResourceType> {
        self.kinds.get(&normalize(url)).copied()
    }

    /// URLs in the order they appeared in the prefetch file, alongside their
    /// resource type, for building the preload `Link:` header.
    pub fn ordered(&self) -> Vec<(&str, ResourceType)> {
        self.order
            .iter()
            .map(|u| (u.as_str(), self.kinds[&normalize(u)]))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyPriority {
    Important,
    SemiImportant,
    Unimportant,
}

impl DependencyPriority {
    fn parse(s: &str) -> Self {
        match s {
            "Important" => DependencyPriority::Important,
            "Semi-important" => DependencyPriority::SemiImportant,
            _ => DependencyPriority::Unimportant,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyChild {
    pub url: String,
    pub resource_type: ResourceType,
    pub priority: DependencyPriority,
}

/// Parsed dependency file: parent URL (trailing slash stripped) -> ordered
/// list of children. Format: `<parent-url> <ignored> <child-url> <ignored>
/// <resource-type> <priority> [<vroom-priority>]`.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    children: HashMap<String, Vec<DependencyChild>>,
}

impl DependencyTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut children: HashMap<String, Vec<DependencyChild>> = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let fields: Vec<&str> = line.split(' ').collect();
            if fields.len() < 6 {
                continue;
            }
            let parent = crate::url_util::remove_trailing_slash(fields[0]).to_string();
            let child = DependencyChild {
                url: fields[2].to_string(),
                resource_type: ResourceType::parse(fields[4]),
                // The dependency file's 6th field is the predefined
                // priority used for push decisions; the 5th (Chrome's own
                // request priority) is recorded by the original tool but not
                // used here, matching replayserver.cc.
                priority: DependencyPriority::parse(fields[5]),
            };
            children.entry(parent).or_default().push(child);
        }
        Ok(Self { children })
    }

    pub fn children_of(&self, parent_url: &str) -> &[DependencyChild] {
        let key = crate::url_util::remove_trailing_slash(parent_url);
        self.children.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Parsed server-think-time file: full URL -> artificial delay in
/// milliseconds, applied before writing the replayed response.
#[derive(Debug, Clone, Default)]
pub struct ThinkTimeTable {
    delays: HashMap<String, u64>,
}

impl ThinkTimeTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut delays = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let (Some(url), Some(ms)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let ms: u64 = ms
                .parse()
                .map_err(|_| CoreError::Parse(format!("think-time file: bad delay {ms:?}")))?;
            delays.insert(url.to_string(), ms);
        }
        Ok(Self { delays })
    }

    pub fn delay_ms(&self, url: &str) -> Option<u64> {
        self.delays.get(url).copied()
    }
}

/// Scheme-stripped, case-preserved normalization used as the table key for
/// both the request-order table and the prefetch set.
fn normalize(url: &str) -> String {
    remove_scheme(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn request_order_table_ordinal_is_line_index() {
        let (_d, path) = write_temp("http://a.com/1\nhttp://a.com/2\nhttp://a.com/3\n");
        let table = RequestOrderTable::load(&path).unwrap();
        assert_eq!(table.ordinal("http://a.com/2"), Some(1));
        assert_eq!(table.ordinal("http://a.com/missing"), None);
    }

    #[test]
    fn prefetch_set_preserves_file_order() {
        let (_d, path) = write_temp("http://a.com/img.png Image\nhttp://a.com/s.js Script\n");
        let set = PrefetchSet::load(&path).unwrap();
        let ordered: Vec<_> = set.ordered().into_iter().map(|(u, _)| u.to_string()).collect();
        assert_eq!(ordered, vec!["http://a.com/img.png", "http://a.com/s.js"]);
        assert_eq!(set.kind_of("http://a.com/img.png"), Some(ResourceType::Image));
    }

    #[test]
    fn dependency_table_groups_children_by_parent() {
        let (_d, path) = write_temp(
            "http://a.com/ x http://a.com/b.js x Script Important High\nhttp://a.com/ x http://a.com/c.png x Image Semi-important Low\n",
        );
        let table = DependencyTable::load(&path).unwrap();
        let children = table.children_of("http://a.com/");
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].priority, DependencyPriority::Important);
        assert_eq!(children[1].priority, DependencyPriority::SemiImportant);
    }

    #[test]
    fn think_time_table_parses_delays() {
        let (_d, path) = write_temp("http://a.com/slow 250\n");
        let table = ThinkTimeTable::load(&path).unwrap();
        assert_eq!(table.delay_ms("http://a.com/slow"), Some(250));
        assert_eq!(table.delay_ms("http://a.com/other"), None);
    }
}
