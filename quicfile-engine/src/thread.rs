//! Thread spawning glue.
//!
//! Thread names show up in debuggers and `/proc`; the kernel silently
//! rejects over-long ones, so names are truncated to the platform limit
//! before the spawn.

use std::io;
use std::thread::{Builder, JoinHandle};

/// Linux caps thread names at 15 bytes plus the terminator.
#[cfg(target_os = "linux")]
const MAX_THREAD_NAME: usize = 15;

/// Darwin and the rest allow 63 bytes.
#[cfg(not(target_os = "linux"))]
const MAX_THREAD_NAME: usize = 63;

/// Spawn a named thread, truncating the name to the platform limit.
pub fn spawn_named<F, T>(name: &str, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Builder::new().name(truncate_name(name)).spawn(f)
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_THREAD_NAME {
        return name.to_string();
    }
    let mut cut = MAX_THREAD_NAME;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(truncate_name("engine-io"), "engine-io");
    }

    #[test]
    fn long_names_are_truncated_to_the_platform_limit() {
        let long = "a-very-long-thread-name-that-no-kernel-accepts-verbatim";
        let truncated = truncate_name(long);
        assert!(truncated.len() <= MAX_THREAD_NAME);
        assert!(long.starts_with(&truncated));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let name = "loop-\u{00e9}".repeat(20);
        let truncated = truncate_name(&name);
        assert!(truncated.len() <= MAX_THREAD_NAME);
    }

    #[test]
    fn spawned_thread_carries_its_name() {
        let handle = spawn_named("name-check", || {
            std::thread::current().name().map(str::to_string)
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("name-check"));
    }
}
