fn main() {
    // Filters are extracted from `libc` filters
    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    compile_error!("Building vpmap for an unsupported platform. /proc/<pid>/pagemap only exists on linux and android")
}
