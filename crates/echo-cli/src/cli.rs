//! Command-line flags.

use std::path::PathBuf;

use clap::Parser;

/// Talk with a language model hands-free: speak, pause, listen, interrupt.
#[derive(Debug, Parser)]
#[command(name = "echo")]
#[command(about = "Duplex voice conversation with a language model")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file (every key optional)
    #[arg(short = 'c', long = "config", env = "ECHO_CONFIG")]
    pub config: Option<PathBuf>,

    /// API key for the model endpoint
    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name sent with every request
    #[arg(long = "model", env = "ECHO_MODEL")]
    pub model: Option<String>,

    /// Streaming chat-completions endpoint
    #[arg(long = "model-url", env = "ECHO_MODEL_URL")]
    pub model_url: Option<String>,

    /// Speech synthesis endpoint
    #[arg(long = "tts-url", env = "ECHO_TTS_URL")]
    pub tts_url: Option<String>,

    /// Recognition language (BCP-47)
    #[arg(long = "language", env = "ECHO_LANGUAGE")]
    pub language: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long = "print-config")]
    pub print_config: bool,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_parse() {
        let cli = Cli::parse_from([
            "echo",
            "--model",
            "gpt-4o-mini",
            "--tts-url",
            "http://127.0.0.1:3001/tts",
            "-v",
        ]);
        assert_eq!(cli.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cli.tts_url.as_deref(), Some("http://127.0.0.1:3001/tts"));
        assert!(cli.verbose);
        assert!(!cli.print_config);
    }
}
