/// Fixed chunk size used when nothing else is configured (10 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Retries allowed per chunk before the upload is declared failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Chunk transfers allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Port the upload server listens on by default.
pub const DEFAULT_PORT: u16 = 18080;

/// `code` value carried by every successful response body.
pub const CODE_OK: i32 = 0;

/// `code` value carried by error response bodies.
pub const CODE_ERROR: i32 = 1;

/// Existence / resume query. `{filename}` is the artifact name.
pub const CHECK_ROUTE: &str = "/api/checkFileIsExist/{filename}";

/// Raw chunk upload. Query: `chunkFilename`, `start`, optional `chunkTotal`.
pub const UPLOAD_ROUTE: &str = "/api/upload/{filename}";

/// Merge request. Query: `chunkSize`, optional `fileSize`.
pub const MERGE_ROUTE: &str = "/api/merge/{filename}";

/// Builds the request path for a route template and an (already encoded) artifact name.
pub fn route_path(route: &str, encoded_name: &str) -> String {
    route.replace("{filename}", encoded_name)
}
