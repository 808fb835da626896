use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_DEMO: &str = "demo";
pub const ARG_DSN: &str = "dsn";
pub const ARG_SUPABASE_URL: &str = "supabase-url";
pub const ARG_SUPABASE_ANON_KEY: &str = "supabase-anon-key";
pub const ARG_SUPABASE_SERVICE_ROLE_KEY: &str = "supabase-service-role-key";
pub const ARG_REFRESH_MARGIN_SECONDS: &str = "refresh-margin-seconds";

/// Where identities and profiles come from.
#[derive(Debug, Clone)]
pub enum Options {
    /// In-process backend seeded with one account per role.
    Demo,
    Hosted(Hosted),
}

/// Hosted identity service plus the Postgres profile table.
#[derive(Debug, Clone)]
pub struct Hosted {
    pub dsn: String,
    pub supabase_url: String,
    pub anon_key: SecretString,
    pub service_role_key: Option<SecretString>,
    pub refresh_margin_seconds: i64,
}

impl Options {
    /// Parse backend arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a hosted-mode argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        if matches.get_flag(ARG_DEMO) {
            return Ok(Self::Demo);
        }

        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self::Hosted(Hosted {
            dsn: read_required(ARG_DSN)?,
            supabase_url: read_required(ARG_SUPABASE_URL)?,
            anon_key: SecretString::from(read_required(ARG_SUPABASE_ANON_KEY)?),
            service_role_key: matches
                .get_one::<String>(ARG_SUPABASE_SERVICE_ROLE_KEY)
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::from(v.clone())),
            refresh_margin_seconds: matches
                .get_one::<i64>(ARG_REFRESH_MARGIN_SECONDS)
                .copied()
                .unwrap_or(60),
        }))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DEMO)
                .long(ARG_DEMO)
                .help("Serve the built-in demo accounts from memory")
                .long_help(
                    "Serve the built-in demo accounts from memory instead of the hosted identity service and Postgres. OTP codes are written to the log.",
                )
                .env("MAXIRENT_DEMO")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("MAXIRENT_DSN")
                .required_unless_present(ARG_DEMO),
        )
        .arg(
            Arg::new(ARG_SUPABASE_URL)
                .long(ARG_SUPABASE_URL)
                .help("Identity service project URL, e.g. https://abcd.supabase.co")
                .env("MAXIRENT_SUPABASE_URL")
                .required_unless_present(ARG_DEMO),
        )
        .arg(
            Arg::new(ARG_SUPABASE_ANON_KEY)
                .long(ARG_SUPABASE_ANON_KEY)
                .help("Identity service public (anon) API key")
                .env("MAXIRENT_SUPABASE_ANON_KEY")
                .hide_env_values(true)
                .required_unless_present(ARG_DEMO),
        )
        .arg(
            Arg::new(ARG_SUPABASE_SERVICE_ROLE_KEY)
                .long(ARG_SUPABASE_SERVICE_ROLE_KEY)
                .help("Identity service admin key, needed to create users and sign in by username")
                .env("MAXIRENT_SUPABASE_SERVICE_ROLE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_MARGIN_SECONDS)
                .long(ARG_REFRESH_MARGIN_SECONDS)
                .help("Renew access tokens this many seconds before they expire")
                .env("MAXIRENT_REFRESH_MARGIN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
}
