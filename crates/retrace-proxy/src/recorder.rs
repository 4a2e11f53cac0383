//! Persists completed request/response pairs to the recording directory
//! (spec §4.5 write-side). Filenames are arbitrary but stable; ordering of
//! writes across connections is unspecified.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use retrace_core::codec::write_record;
use retrace_core::error::Result;
use retrace_core::record::RequestResponse;

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(0);

pub struct Recorder {
    dir: PathBuf,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn record(&self, entry: RequestResponse) -> Result<()> {
        let id = NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed);
        let suffix: u32 = rand::random();
        let path = self.dir.join(format!("record-{id:016x}-{suffix:08x}.bin"));
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_to_file(&dir, &path, &entry))
            .await
            .map_err(|e| retrace_core::error::CoreError::Internal(format!("recorder task panicked: {e}")))?
    }
}

fn write_to_file(dir: &Path, path: &Path, entry: &RequestResponse) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = std::fs::File::create(path)?;
    write_record(&mut file, entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::message::{HttpRequest, HttpResponse};
    use retrace_core::record::Scheme;

    #[tokio::test]
    async fn records_land_in_the_recording_directory() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path());

        let entry = RequestResponse {
            scheme: Scheme::Http,
            request: HttpRequest {
                method: "GET".into(),
                uri: "/".into(),
                version: "HTTP/1.1".into(),
                headers: Default::default(),
                body: Vec::new(),
                request_id: Some(0),
            },
            response: HttpResponse {
                version: "HTTP/1.1".into(),
                status: 200,
                reason: "OK".into(),
                headers: Default::default(),
                body: Vec::new(),
            },
        };
        recorder.record(entry).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
