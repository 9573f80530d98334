//! Unit tests for the config module

#[cfg(test)]
mod tests {
    use crate::config::{self, Config};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").expect("empty config should parse");

        assert_eq!(config.transcoder.program, "ffmpeg");
        assert_eq!(config.transcoder.buffer_frames, 150);
        assert_eq!(config.scheduler.underrun_tolerance(), Duration::from_secs(5));
        assert_eq!(config.scheduler.trailing_silence_frames, 5);
        assert_eq!(config.session.connect_attempts, 5);
        assert_eq!(config.session.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.session.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.resolver.timeout(), Duration::from_secs(30));
        assert_eq!(config.resolver.max_duration(), None);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [session]
            max_queue_len = 5
            idle_timeout_secs = 0

            [resolver]
            max_duration_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.session.max_queue_len, 5);
        assert_eq!(config.session.idle_timeout(), None);
        assert_eq!(config.session.connect_attempts, 5);
        assert_eq!(
            config.resolver.max_duration(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_connect_backoff_grows_with_attempt() {
        let config = Config::default();

        assert_eq!(config.session.connect_backoff(1), Duration::from_secs(5));
        assert_eq!(config.session.connect_backoff(3), Duration::from_secs(15));
    }

    #[test]
    fn test_default_transcoder_args_contain_input_placeholder() {
        let config = Config::default();
        assert!(config.transcoder.args.iter().any(|arg| arg == "{input}"));
        assert!(config.transcoder.args.iter().any(|arg| arg == "s16le"));
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let result = Config::from_toml("[transcoder]\nbuffer_frames = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_args_without_input() {
        let result = Config::from_toml("[transcoder]\nargs = [\"-i\", \"pipe:0\"]\n");
        let error = format!("{:#}", result.unwrap_err());
        assert!(error.contains("{input}"));
    }

    #[test]
    fn test_rejects_zero_underrun_tolerance() {
        assert!(Config::from_toml("[scheduler]\nunderrun_tolerance_ms = 0\n").is_err());
    }

    #[test]
    fn test_rejects_zero_max_lateness() {
        assert!(Config::from_toml("[scheduler]\nmax_lateness_frames = 0\n").is_err());
        assert!(Config::from_toml("[scheduler]\nmax_lateness_frames = 1\n").is_ok());
    }

    #[test]
    fn test_rejects_zero_connect_attempts() {
        assert!(Config::from_toml("[session]\nconnect_attempts = 0\n").is_err());
    }

    #[test]
    fn test_rejects_invalid_toml() {
        assert!(Config::from_toml("[session\nmax_queue_len = ").is_err());
    }

    #[tokio::test]
    async fn test_load_reads_file_named_by_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\ntrailing_silence_frames = 3").unwrap();

        std::env::set_var("BRIDGE_CONFIG", file.path());
        let config = config::load().await;
        std::env::remove_var("BRIDGE_CONFIG");

        assert_eq!(config.unwrap().scheduler.trailing_silence_frames, 3);
    }
}
