//! Replay matcher: given a CGI-style environment description of an incoming
//! request and a directory of recorded request/response pairs, selects the
//! best stored response and mutates it (cache/CORS headers, dependency
//! push, JSONP callback rewrite) before it is written out.

pub mod env;
pub mod jsonp;
pub mod matcher;
pub mod mutate;
pub mod output;

pub use env::ReplayEnv;
pub use matcher::{MatcherConfig, Tier2Strategy, find_best_match};
