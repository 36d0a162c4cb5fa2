//! Command-line handling for the startup driver.

use thiserror::Error;

/// Errors raised while reading the command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    #[error("Unknown argument: {0}")]
    Unknown(String),

    #[error("--configure-for-testing requires a build with the `testing` feature")]
    TestingUnavailable,
}

/// What the driver was asked to do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartupArgs {
    /// `--name=value` runtime options, in order.
    pub options: Vec<String>,
    /// Unlock restricted options before applying `options`.
    pub restricted_options: bool,
    /// Keep the record writable after freezing and unlock restricted options.
    pub configure_for_testing: bool,
    /// Print the option table and exit.
    pub list_options: bool,
}

impl StartupArgs {
    pub fn parse<I>(args: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();

        for arg in args {
            match arg.as_str() {
                "--restricted-options" => parsed.restricted_options = true,
                "--list-options" => parsed.list_options = true,
                "--configure-for-testing" => {
                    if !cfg!(feature = "testing") {
                        return Err(ArgsError::TestingUnavailable);
                    }
                    parsed.configure_for_testing = true;
                }
                option if option.starts_with("--") && option.contains('=') => {
                    parsed.options.push(option.to_string())
                }
                other => return Err(ArgsError::Unknown(other.to_string())),
            }
        }

        Ok(parsed)
    }
}
