//! issue-api-token — mint an operator API token for the admin surface.
//!
//! ```text
//! issue-api-token --user=alice --roles=admin,viewer --secret=$STORM_API_SECRET
//! ```
//!
//! Prints the token to stdout. Exit code 0 on success, 1 on invalid
//! arguments. The token verifies against the same secret configured on the
//! control plane (STORM_API_SECRET).

use std::process::ExitCode;

use clap::Parser;
use storm_auth::{ApiTokenClaims, token};
use storm_core::epoch_secs;

#[derive(Parser)]
#[command(name = "issue-api-token", about = "Mint a StormStack operator API token")]
struct Cli {
    /// Comma-separated roles to embed (e.g. admin,viewer).
    #[arg(long, value_delimiter = ',', required = true)]
    roles: Vec<String>,

    /// User name the token identifies.
    #[arg(long, required = true)]
    user: String,

    /// Signing secret shared with the control plane.
    #[arg(long, required = true)]
    secret: String,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let roles: Vec<String> = cli
        .roles
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if roles.is_empty() {
        eprintln!("error: at least one role is required");
        return ExitCode::from(1);
    }
    if cli.user.trim().is_empty() {
        eprintln!("error: user must not be empty");
        return ExitCode::from(1);
    }
    if cli.secret.is_empty() {
        eprintln!("error: secret must not be empty");
        return ExitCode::from(1);
    }

    let claims = ApiTokenClaims {
        user: cli.user.trim().to_string(),
        roles,
        issued_at: epoch_secs(),
    };
    match token::mint(&claims, &cli.secret) {
        Ok(minted) => {
            println!("{minted}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_roles() {
        let cli = Cli::try_parse_from([
            "issue-api-token",
            "--roles=admin,viewer",
            "--user=alice",
            "--secret=s3cret",
        ])
        .unwrap();
        assert_eq!(cli.roles, vec!["admin", "viewer"]);
        assert_eq!(cli.user, "alice");
    }

    #[test]
    fn missing_flags_fail_to_parse() {
        assert!(Cli::try_parse_from(["issue-api-token", "--user=alice"]).is_err());
        assert!(Cli::try_parse_from(["issue-api-token"]).is_err());
    }

    #[test]
    fn minted_token_verifies_against_the_same_secret() {
        let claims = ApiTokenClaims {
            user: "alice".to_string(),
            roles: vec!["admin".to_string()],
            issued_at: epoch_secs(),
        };
        let minted = token::mint(&claims, "s3cret").unwrap();
        let decoded = token::verify(&minted, "s3cret").unwrap();
        assert_eq!(decoded.user, "alice");
        assert!(decoded.has_role("admin"));
    }
}
