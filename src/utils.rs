/// Group numeric digits to facilitate reading long numbers
pub fn group_digits<F: std::fmt::Display>(n: F) -> String {
    use numsep::{separate, Locale};
    separate(n, Locale::English)
}

pub mod timing {

    use super::group_digits;
    use std::time::{Duration, Instant};
    use std::io::Write;

    pub struct Progress {
        previous: Instant,
    }

    impl Progress {

        #[allow(clippy::new_without_default)]
        pub fn new() -> Self { Self { previous: Instant::now() } }

        /// Print message, append ellipsis, flush stdout, stay on same line, start timer.
        pub fn start(&mut self, message: &str) {
            print!("{message} ... ");
            // Nothing useful to do if the terminal is gone
            let _ = std::io::stdout().flush();
            self.start_timer();
        }

        // Print time elapsed since last start or done
        pub fn done(&mut self) {
            println!("{}", millis(self.previous.elapsed()));
            self.start_timer();
        }

        // Print message followed by time elapsed since last start or done
        pub fn done_with_message(&mut self, message: &str) {
            println!("{message}: {}", millis(self.previous.elapsed()));
            self.start_timer();
        }

        fn start_timer(&mut self) { self.previous = Instant::now() }
    }

    /// `duration` as grouped milliseconds, e.g. `12,345 ms`
    pub fn millis(duration: Duration) -> String {
        format!("{} ms", group_digits(duration.as_millis()))
    }
}
