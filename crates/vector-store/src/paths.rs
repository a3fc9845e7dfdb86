use std::path::{Path, PathBuf};

/// Directory under the working tree holding persisted state
pub const DATA_DIR_NAME: &str = ".repograph";
pub const GRAPH_FILE_NAME: &str = "graph.json";
pub const STORE_FILE_NAME: &str = "store.json";

#[must_use]
pub fn data_dir_for_root(root: &Path) -> PathBuf {
    root.join(DATA_DIR_NAME)
}

#[must_use]
pub fn graph_path_for_root(root: &Path) -> PathBuf {
    data_dir_for_root(root).join(GRAPH_FILE_NAME)
}

#[must_use]
pub fn store_path_for_root(root: &Path) -> PathBuf {
    data_dir_for_root(root).join(STORE_FILE_NAME)
}

/// Whether a path component names the data directory
#[must_use]
pub fn is_data_dir_name(name: &str) -> bool {
    name == DATA_DIR_NAME
}
