use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use persona_cli::{generate, scaffold};
use persona_engine::SamplingParams;
use persona_server::logging::{self, LogFormat};

/// Persona gateway tooling.
#[derive(Parser)]
#[command(name = "persona-cli", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Write a demo base model, one adapter per persona and gateway.toml.
    Scaffold {
        /// Output directory.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Seed for the demo weights.
        #[arg(short, long, default_value_t = 7)]
        seed: u64,

        /// Overwrite an existing gateway.toml.
        #[arg(long)]
        force: bool,
    },
    /// Generate one answer locally, printing text as it arrives.
    Generate {
        /// Gateway configuration file.
        #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "gateway.toml")]
        config: PathBuf,

        /// Persona id, e.g. kant.
        #[arg(long)]
        persona: String,

        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        /// Maximum number of tokens to generate.
        #[arg(short, long, default_value_t = 160)]
        max_tokens: usize,

        /// Sampling temperature (must be > 0).
        #[arg(short, long, default_value_t = 0.7)]
        temperature: f32,

        /// Random seed for reproducible sampling.
        #[arg(short, long)]
        seed: Option<u64>,
    },
}

fn main() {
    logging::init(Some("warn"), LogFormat::from_env());
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Scaffold { out, seed, force } => scaffold(&out, seed, force).map(|report| {
            println!("wrote {}", report.config.display());
            println!("base model: {}", report.base_model.display());
            for adapter in &report.adapters {
                println!("adapter: {}", adapter.display());
            }
        }),
        Command::Generate {
            config,
            persona,
            prompt,
            max_tokens,
            temperature,
            seed,
        } => {
            let params = SamplingParams {
                max_output_tokens: max_tokens,
                temperature,
                seed,
                ..Default::default()
            };
            let mut stdout = std::io::stdout();
            generate(&config, &persona, &prompt, &params, |text| {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            })
            .map(|_| println!())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
