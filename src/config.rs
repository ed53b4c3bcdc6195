use std::path::PathBuf;

/// Tunables for the storage core. The teacher hard-codes most of these as
/// module-level statics; this crate collects them so tests can run several
/// independent `Database` instances side by side with different page sizes.
#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: usize,
    pub buffer_pool_capacity: usize,
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 4096,
            buffer_pool_capacity: 50,
            log_path: PathBuf::from("small-storage.log"),
        }
    }
}
