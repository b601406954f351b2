fn main() {
    println!("Run `cargo test -p end-to-end` to exercise the server and client over loopback.");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use ferry_server::{ServerConfig, UploadServer};
    use ferry_uploader::{
        HttpTransport, RetryPolicy, UploadConfig, UploadEvent, UploadOrchestrator, UploadOutcome,
        UploadStatus,
    };
    use tempfile::TempDir;

    const CHUNK: u64 = 64 * 1024;

    struct Harness {
        dir: TempDir,
        server: Arc<UploadServer>,
        base_url: String,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        async fn start() -> Self {
            let dir = TempDir::new().unwrap();
            let server = UploadServer::new(ServerConfig {
                bind: ([127, 0, 0, 1], 0).into(),
                public_dir: dir.path().join("public"),
                temp_dir: dir.path().join("temp"),
            })
            .unwrap();

            let runner = Arc::clone(&server);
            let task = tokio::spawn(async move { runner.run().await.unwrap() });

            let addr = loop {
                if let Some(addr) = server.local_addr().await {
                    break addr;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };

            Self {
                dir,
                server,
                base_url: format!("http://{addr}"),
                task,
            }
        }

        fn orchestrator(&self) -> UploadOrchestrator<HttpTransport> {
            let config = UploadConfig {
                chunk_size: CHUNK,
                max_concurrency: 3,
                retry: RetryPolicy {
                    initial_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(50),
                    ..RetryPolicy::default()
                },
            };
            UploadOrchestrator::new(HttpTransport::new(&self.base_url).unwrap(), config)
        }

        fn public(&self, name: &str) -> PathBuf {
            self.dir.path().join("public").join(name)
        }

        fn session_dir(&self, name: &str) -> PathBuf {
            self.dir.path().join("temp").join(name)
        }

        async fn stop(self) {
            self.server.shutdown();
            self.task.await.unwrap();
        }
    }

    /// Writes `len` bytes of patterned data to `dir/name`.
    fn write_source(dir: &Path, name: &str, len: u64) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn upload_produces_identical_artifact() {
        let h = Harness::start().await;
        let src = TempDir::new().unwrap();
        let (path, data) = write_source(src.path(), "movie.mp4", CHUNK * 3 + 1234);

        let mut orch = h.orchestrator();
        let mut events = orch.take_events().unwrap();
        let outcome = orch.upload(&path).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Uploaded { size: data.len() as u64 });
        assert_eq!(orch.status(), UploadStatus::Complete);

        let identity = orch.identity().unwrap();
        assert!(identity.as_str().ends_with(".mp4"));
        assert_eq!(std::fs::read(h.public(identity.as_str())).unwrap(), data);
        assert!(!h.session_dir(identity.as_str()).exists());

        let mut completed = false;
        while let Ok(ev) = events.try_recv() {
            completed |= matches!(ev, UploadEvent::Completed { .. });
        }
        assert!(completed);

        h.stop().await;
    }

    #[tokio::test]
    async fn second_upload_is_deduplicated() {
        let h = Harness::start().await;
        let src = TempDir::new().unwrap();
        let (path, _) = write_source(src.path(), "a.bin", CHUNK * 2);

        assert!(matches!(
            h.orchestrator().upload(&path).await.unwrap(),
            UploadOutcome::Uploaded { .. }
        ));

        // Same bytes under another file name with the same extension.
        let copy = src.path().join("copy.bin");
        std::fs::copy(&path, &copy).unwrap();
        let orch = h.orchestrator();
        assert_eq!(orch.upload(&copy).await.unwrap(), UploadOutcome::Deduplicated);

        h.stop().await;
    }

    #[tokio::test]
    async fn resumes_from_partially_persisted_chunk() {
        let h = Harness::start().await;
        let src = TempDir::new().unwrap();
        let (path, data) = write_source(src.path(), "disk.img", CHUNK * 2 + 100);
        let identity = ferry_transfer::artifact_identity(&path).unwrap();
        let client = reqwest::Client::new();

        // A previous run got chunk 0 fully and 1000 bytes of chunk 1 across.
        let chunk = CHUNK as usize;
        for (index, bytes) in [(0, &data[..chunk]), (1, &data[chunk..chunk + 1000])] {
            client
                .post(format!("{}/api/upload/{identity}", h.base_url))
                .query(&[
                    ("chunkFilename", identity.chunk_name(index)),
                    ("start", "0".to_string()),
                ])
                .body(bytes.to_vec())
                .send()
                .await
                .unwrap()
                .error_for_status()
                .unwrap();
        }

        let check: serde_json::Value = client
            .get(format!("{}/api/checkFileIsExist/{identity}", h.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(check["exist"], false);
        assert_eq!(check["uploadedChunks"][1]["size"], 1000);

        let orch = h.orchestrator();
        orch.upload(&path).await.unwrap();
        assert_eq!(std::fs::read(h.public(identity.as_str())).unwrap(), data);

        h.stop().await;
    }

    #[tokio::test]
    async fn check_response_wire_format() {
        let h = Harness::start().await;
        let client = reqwest::Client::new();

        let missing: serde_json::Value = client
            .get(format!("{}/api/checkFileIsExist/nothing.bin", h.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            missing,
            serde_json::json!({ "code": 0, "exist": false, "uploadedChunks": [] })
        );

        let conflict = client
            .post(format!(
                "{}/api/upload/nothing.bin?chunkFilename=nothing.bin-0&start=7",
                h.base_url
            ))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(conflict.status(), 409);
        let body: serde_json::Value = conflict.json().await.unwrap();
        assert_eq!(body["code"], 1);
        assert!(body["message"].is_string());

        h.stop().await;
    }
}
