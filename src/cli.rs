//! Command line arguments.

use clap::Parser;
use clap::error::ErrorKind;

/// Bridges an MQTT broker and CoAP observers.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Cli {
    /// MQTT broker address, e.g. `tcp://localhost:1883`.
    #[arg(value_name = "mqtt broker")]
    pub broker: String,

    /// MQTT client identifier.
    #[arg(value_name = "mqtt client id")]
    pub client_id: String,

    /// UDP port the CoAP server listens on.
    #[arg(value_name = "coap server port")]
    pub coap_port: u16,
}

/// Result of interpreting the command line.
#[derive(Debug)]
pub enum Invocation {
    /// All three arguments were given and valid.
    Run(Cli),
    /// Wrong argument count, `--help` or `--version`: print `text` and exit
    /// successfully.
    Exit(String),
    /// An argument was present but invalid.
    Invalid(clap::Error),
}

impl Cli {
    /// Interprets `args` (including the program name).
    pub fn interpret<I, T>(args: I) -> Invocation
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(cli) => Invocation::Run(cli),
            Err(err) => match err.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                    Invocation::Exit(err.to_string())
                }
                ErrorKind::MissingRequiredArgument
                | ErrorKind::UnknownArgument
                | ErrorKind::TooManyValues
                | ErrorKind::WrongNumberOfValues => Invocation::Exit(usage()),
                _ => Invocation::Invalid(err),
            },
        }
    }
}

fn usage() -> String {
    use clap::CommandFactory;
    Cli::command().render_usage().to_string()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn three_arguments_run() {
        let Invocation::Run(cli) =
            Cli::interpret(["bridge", "tcp://localhost:1883", "bridge-1", "5683"])
        else {
            panic!("expected a run invocation");
        };
        assert_eq!(cli.broker, "tcp://localhost:1883");
        assert_eq!(cli.client_id, "bridge-1");
        assert_eq!(cli.coap_port, 5683);
    }

    #[test]
    fn too_few_arguments_print_usage() {
        let Invocation::Exit(text) = Cli::interpret(["bridge", "tcp://localhost:1883"]) else {
            panic!("expected usage");
        };
        assert!(text.contains("Usage"));
    }

    #[test]
    fn too_many_arguments_print_usage() {
        let invocation = Cli::interpret(["bridge", "a", "b", "5683", "extra"]);
        assert!(matches!(invocation, Invocation::Exit(_)));
    }

    #[test]
    fn bad_port_is_invalid() {
        let invocation = Cli::interpret(["bridge", "a", "b", "not-a-port"]);
        assert!(matches!(invocation, Invocation::Invalid(_)));
    }
}
