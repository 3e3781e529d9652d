use anyhow::bail;
use clap::{Parser, ValueEnum};
use hashflake::{AttachPolicy, BitLayout, CUSTOM_EPOCH, Mode, Scripts};

/// How IDs are serialized across processes sharing the key.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Distributed lock around read-modify-write (works on any Redis).
    Locked,
    /// One Lua script per ID, no lock.
    LockFree,
}

/// Command-line and environment configuration for the `hashflake` binary.
///
/// Every process sharing `HASHFLAKE_KEY` must agree on the bit layout and use
/// a distinct `MACHINE_ID`. The first process to bootstrap the key fixes its
/// layout; later ones attach to it.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hashflake",
    version,
    about = "Generate Snowflake-style IDs coordinated through a shared Redis hash"
)]
pub struct CliArgs {
    /// Redis connection URL.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL", default_value_t = String::from("redis://127.0.0.1:6379"))]
    pub redis_url: String,

    /// Coordination key holding the shared state record.
    ///
    /// Environment variable: `HASHFLAKE_KEY`
    #[arg(long, env = "HASHFLAKE_KEY", default_value_t = String::from("hashflake"))]
    pub key: String,

    /// Lock key used in `locked` mode. Defaults to `<key>:lock`.
    ///
    /// Environment variable: `HASHFLAKE_LOCK_KEY`
    #[arg(long, env = "HASHFLAKE_LOCK_KEY")]
    pub lock_key: Option<String>,

    /// Width of the timestamp field.
    ///
    /// Environment variable: `TIMESTAMP_BITS`
    #[arg(long, env = "TIMESTAMP_BITS", default_value_t = 41)]
    pub timestamp_bits: u8,

    /// Width of the machine id field.
    ///
    /// Environment variable: `MACHINE_ID_BITS`
    #[arg(long, env = "MACHINE_ID_BITS", default_value_t = 10)]
    pub machine_id_bits: u8,

    /// Width of the sequence field. The three widths must sum to 63.
    ///
    /// Environment variable: `SEQ_BITS`
    #[arg(long, env = "SEQ_BITS", default_value_t = 12)]
    pub seq_bits: u8,

    /// Epoch of the timestamp field, in milliseconds since 1970-01-01 UTC.
    /// Defaults to 2025-01-01.
    ///
    /// Environment variable: `START_TIMESTAMP`
    #[arg(long, env = "START_TIMESTAMP", default_value_t = CUSTOM_EPOCH.as_millis() as i64)]
    pub start_timestamp: i64,

    /// Machine id embedded in every ID this process creates the key with.
    ///
    /// Environment variable: `MACHINE_ID`
    #[arg(long, env = "MACHINE_ID", default_value_t = 0)]
    pub machine_id: i64,

    /// Coordination strategy.
    ///
    /// Environment variable: `MODE`
    #[arg(long, env = "MODE", value_enum, default_value_t = ModeArg::Locked)]
    pub mode: ModeArg,

    /// Number of IDs to generate.
    ///
    /// Environment variable: `COUNT`
    #[arg(short = 'n', long, env = "COUNT", default_value_t = 1)]
    pub count: usize,

    /// Refuse to attach to a key whose stored layout or machine id differs.
    ///
    /// Environment variable: `STRICT_ATTACH`
    #[arg(long, env = "STRICT_ATTACH", default_value_t = false)]
    pub strict_attach: bool,

    /// Print the timestamp, machine id and sequence of each ID.
    #[arg(short, long, default_value_t = false)]
    pub decode: bool,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub redis_url: String,
    pub key: String,
    pub mode: Mode,
    pub layout: BitLayout,
    pub machine_id: i64,
    pub count: usize,
    pub attach: AttachPolicy,
    pub decode: bool,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.key.is_empty() {
            bail!("HASHFLAKE_KEY must not be empty");
        }
        if args.count == 0 {
            bail!("COUNT must be greater than 0");
        }

        let layout = BitLayout::new(args.timestamp_bits, args.machine_id_bits, args.seq_bits)
            .with_start_millis(args.start_timestamp);
        layout.validate()?;
        layout.validate_machine_id(args.machine_id)?;

        let mode = match args.mode {
            ModeArg::Locked => {
                let lock_key = args
                    .lock_key
                    .unwrap_or_else(|| format!("{}:lock", args.key));
                if lock_key == args.key {
                    bail!("HASHFLAKE_LOCK_KEY must differ from HASHFLAKE_KEY ({lock_key})");
                }
                Mode::Locked { lock_key }
            }
            ModeArg::LockFree => Mode::LockFree {
                scripts: Scripts::bundled(),
            },
        };

        Ok(Self {
            redis_url: args.redis_url,
            key: args.key,
            mode,
            layout,
            machine_id: args.machine_id,
            count: args.count,
            attach: if args.strict_attach {
                AttachPolicy::Strict
            } else {
                AttachPolicy::Warn
            },
            decode: args.decode,
        })
    }
}
