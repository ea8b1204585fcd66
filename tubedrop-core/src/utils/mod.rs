//! Small helpers shared across the crate.

pub mod file_system;

/// Converts a list of string slices into owned strings.
///
/// # Arguments
///
/// * `args` - The strings to convert.
pub fn to_owned(args: Vec<impl AsRef<str>>) -> Vec<String> {
    args.into_iter().map(|arg| arg.as_ref().to_string()).collect()
}

/// Appends the platform executable extension to a program name.
///
/// # Arguments
///
/// * `name` - The bare name of the executable, e.g. `yt-dlp`.
pub fn find_executable(name: impl AsRef<str>) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", name.as_ref())
    } else {
        name.as_ref().to_string()
    }
}
