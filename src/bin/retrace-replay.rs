//! Replay-mode CGI entry point (spec §7): reads a single request's
//! description from the process environment, finds the best-matching
//! recorded response, mutates it, and writes it to stdout. No CLI arguments;
//! configuration is entirely environment-driven, matching the CGI contract
//! `original_source/src/frontend/replayserver.cc` runs under.

use std::io::Write;

use retrace_core::config::{DependencyTable, ThinkTimeTable};
use retrace_core::error::CoreError;
use retrace_replay::{MatcherConfig, ReplayEnv, find_best_match, jsonp, mutate, output};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(run().await);
}

/// Runs the full replay pipeline and returns the process exit code. A match
/// is the only success path; every other outcome writes a response body to
/// stdout but still exits non-zero, mirroring the original's `main`.
async fn run() -> i32 {
    let env = match ReplayEnv::from_process_env() {
        Ok(env) => env,
        Err(CoreError::MissingConfig(name)) => {
            write_out(&output::missing_config(&name));
            return 1;
        }
        Err(e) => {
            write_out(&output::internal_error(e));
            return 1;
        }
    };

    if let Err(e) = std::env::set_current_dir(&env.chdir) {
        write_out(&output::internal_error(format!(
            "chdir to {}: {e}",
            env.chdir.display()
        )));
        return 1;
    }

    let matcher_config = MatcherConfig::default();
    let record = match find_best_match(&env.record_path, &env, &matcher_config) {
        Ok(Some(record)) => record,
        Ok(None) => {
            write_out(&output::no_match());
            return 1;
        }
        Err(e) => {
            write_out(&output::internal_error(e));
            return 1;
        }
    };

    let mut response = record.response;

    if let Some(callback) = jsonp::extract_callback(&env.request_uri) {
        let content_encoding = response.headers.get("content-encoding").map(str::to_string);
        match jsonp::rewrite(&response.body, content_encoding.as_deref(), &callback) {
            Ok(Some(rewritten)) => response.body = rewritten,
            Ok(None) => {}
            Err(e) => {
                write_out(&output::internal_error(e));
                return 1;
            }
        }
    }

    mutate::scrub_cache_and_cors(&mut response);

    if let Some(dependency_file) = &env.dependency_file {
        match DependencyTable::load(dependency_file) {
            Ok(deps) => {
                let loading_page = env.loading_page.as_deref().unwrap_or_default();
                mutate::populate_push_configuration(&mut response, &deps, &env.full_url(), loading_page);
            }
            Err(e) => {
                write_out(&output::internal_error(format!(
                    "loading dependency file {}: {e}",
                    dependency_file.display()
                )));
                return 1;
            }
        }
    }

    if let Some(think_time_file) = &env.think_time_file {
        match ThinkTimeTable::load(think_time_file) {
            Ok(table) => {
                if let Some(delay) = mutate::think_time_delay(&table, &env.full_url()) {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                write_out(&output::internal_error(format!(
                    "loading think-time file {}: {e}",
                    think_time_file.display()
                )));
                return 1;
            }
        }
    }

    write_out(&response);
    0
}

fn write_out(response: &retrace_core::message::HttpResponse) {
    let _ = std::io::stdout().write_all(&response.to_bytes());
}
