use std::path::PathBuf;

pub fn default_root() -> PathBuf {
    PathBuf::from(".")
}

pub fn default_app_dir() -> PathBuf {
    PathBuf::from("app")
}

pub fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_port() -> u16 {
    5173
}

pub fn default_client_entry() -> PathBuf {
    PathBuf::from("app/client.tsx")
}

pub fn default_file_name() -> String {
    "client".to_string()
}

pub fn default_client_out_dir() -> PathBuf {
    PathBuf::from("site/static")
}

pub fn default_client_command() -> Vec<String> {
    [
        "npx",
        "esbuild",
        "{entry}",
        "--bundle",
        "--format=esm",
        "--outfile={out_dir}/{file_name}.js",
    ]
    .map(String::from)
    .to_vec()
}

pub fn default_ssr_entry() -> String {
    "app/app.ts".to_string()
}

pub fn default_ssr_out_file() -> PathBuf {
    PathBuf::from(".isle/server.mjs")
}

pub fn default_ssr_build() -> Vec<String> {
    [
        "npx",
        "esbuild",
        "{entry}",
        "--bundle",
        "--platform=node",
        "--format=esm",
        "--outfile={out_file}",
    ]
    .map(String::from)
    .to_vec()
}

pub fn default_ssr_run() -> Vec<String> {
    ["node", "{out_file}"].map(String::from).to_vec()
}

pub fn default_startup_timeout_ms() -> u64 {
    10_000
}

pub fn default_static_prefix() -> String {
    "/static".to_string()
}

pub fn default_cache_control() -> String {
    "no-cache".to_string()
}

pub fn default_watch_ignore() -> Vec<String> {
    ["node_modules", ".git", "target", "*.log"]
        .map(String::from)
        .to_vec()
}

pub fn default_debounce_ms() -> u64 {
    100
}
