const QUERY_ROOT_DIR: &str = ".chainquery";

pub fn get_query_root_dir() -> std::path::PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(QUERY_ROOT_DIR)
    } else {
        std::path::PathBuf::from(".").join(QUERY_ROOT_DIR)
    }
}

pub fn get_service_dir(service_name: &str) -> std::path::PathBuf {
    get_query_root_dir().join(service_name)
}
