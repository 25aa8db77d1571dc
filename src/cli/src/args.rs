//! Command-line arguments.

use std::ffi::OsString;

use clap::error::ErrorKind;
use clap::Parser;
use soci_wrapper_runtime::InvocationRequest;

/// Printed to stdout when the arguments are missing or malformed.
pub const USAGE: &str = "Usage: soci-wrapper REPOSITORY_NAME IMAGE_DIGEST AWS_REGION AWS_ACCOUNT";

/// Build a SOCI index for an image and push it to the image's repository.
#[derive(Parser, Debug)]
#[command(name = "soci-wrapper", version, about)]
pub struct Cli {
    /// Repository holding the image (e.g. "team/app")
    pub repository_name: String,
    /// Manifest digest of the image (e.g. "sha256:...")
    pub image_digest: String,
    /// AWS region of the registry (e.g. "us-west-2")
    pub aws_region: String,
    /// AWS account id owning the registry
    pub aws_account: String,
}

/// What the arguments asked for.
#[derive(Debug)]
pub enum Parsed {
    /// A valid invocation.
    Run(InvocationRequest),
    /// `--help` or `--version`; let clap print it and exit.
    Info(clap::Error),
    /// Missing or invalid arguments.
    Usage(String),
}

/// Parse and validate the arguments. Performs no I/O.
pub fn parse_args<I, T>(args: I) -> Parsed
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return Parsed::Info(e)
        }
        Err(e) => return Parsed::Usage(e.to_string()),
    };

    match InvocationRequest::new(
        &cli.repository_name,
        &cli.image_digest,
        &cli.aws_region,
        &cli.aws_account,
    ) {
        Ok(request) => Parsed::Run(request),
        Err(e) => Parsed::Usage(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> String {
        format!("sha256:{}", "ab".repeat(32))
    }

    #[test]
    fn test_parse_valid() {
        let d = digest();
        match parse_args(["soci-wrapper", "team/app", d.as_str(), "us-east-1", "123456789012"]) {
            Parsed::Run(request) => {
                assert_eq!(request.repository, "team/app");
                assert_eq!(request.digest.as_str(), d);
                assert_eq!(request.region, "us-east-1");
                assert_eq!(request.account, "123456789012");
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_too_few_arguments() {
        let parsed = parse_args(["soci-wrapper", "team/app", "sha256:abc"]);
        assert!(matches!(parsed, Parsed::Usage(_)));
    }

    #[test]
    fn test_parse_no_arguments() {
        assert!(matches!(parse_args(["soci-wrapper"]), Parsed::Usage(_)));
    }

    #[test]
    fn test_parse_invalid_digest() {
        let parsed = parse_args(["soci-wrapper", "app", "latest", "us-east-1", "1"]);
        match parsed {
            Parsed::Usage(message) => assert!(message.contains("Invalid digest")),
            other => panic!("expected Usage, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_invalid_account() {
        let d = digest();
        let parsed = parse_args(["soci-wrapper", "app", d.as_str(), "us-east-1", "acct"]);
        assert!(matches!(parsed, Parsed::Usage(_)));
    }

    #[test]
    fn test_parse_help() {
        assert!(matches!(
            parse_args(["soci-wrapper", "--help"]),
            Parsed::Info(_)
        ));
    }
}
