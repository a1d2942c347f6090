use std::path::Path;

/// Where the agent listens unless `--socket` says otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/downsync/downstream.sock";

/// System trees that are never watched or reported, whatever the excludes say.
pub const SYSTEM_PATHS: &[&str] = &["proc", "sys", "dev", "etc", "lib", "usr", "run", "tmp"];

/// True for `/proc`, `/proc/...`, and the relative `proc/...` forms of every
/// entry in [`SYSTEM_PATHS`].
pub fn is_system_path(path: &Path) -> bool {
    let relative = path.strip_prefix("/").unwrap_or(path);
    SYSTEM_PATHS.iter().any(|root| relative.starts_with(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/proc", true)]
    #[case("/proc/1/status", true)]
    #[case("proc/1/status", true)]
    #[case("/tmp/build.log", true)]
    #[case("usr/lib/libc.so", true)]
    #[case("/app/src/main.go", false)]
    #[case("/procfile", false)]
    #[case("/app/tmp/cache", false)]
    fn system_paths_are_denied(#[case] path: &str, #[case] denied: bool) {
        assert_eq!(is_system_path(Path::new(path)), denied, "{path}");
    }
}
