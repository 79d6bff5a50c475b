use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use clap::error::ErrorKind;

use pystacker::sampler::{self, Config, SystemClock};
use pystacker::{PythonSpy, output};

#[derive(Debug, Parser)]
#[command(
    name = "pystacker",
    version,
    about = "Sampling profiler for running CPython programs",
    after_help = "\
EXAMPLES:
    sudo pystacker 1234                  Profile pid 1234 for one second
    sudo pystacker -s 10 -r 0.01 1234    10 seconds at a 10ms sample rate
    sudo pystacker -t 1234               Timestamp every sample"
)]
struct Args {
    /// Process ID of the python process to profile
    pid: i32,

    /// How many seconds to run for
    #[arg(short, long, default_value_t = 1.0, value_name = "SECS")]
    seconds: f64,

    /// Sample rate, as a fractional value of seconds
    #[arg(short, long, default_value_t = 0.001, value_name = "RATE")]
    rate: f64,

    /// Exclude idle time from statistics
    #[arg(short = 'x', long)]
    exclude_idle: bool,

    /// Include a timestamp for each stack trace
    #[arg(short, long)]
    timestamp: bool,
}

impl Args {
    fn config(&self) -> Result<Config> {
        if self.pid <= 0 {
            bail!("PID {} is out of valid PID range", self.pid);
        }
        if !self.seconds.is_finite() || self.seconds <= 0.0 {
            bail!("--seconds must be a positive number");
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            bail!("--rate must be a positive number");
        }
        Ok(Config {
            duration: Duration::from_secs_f64(self.seconds),
            interval: Duration::from_secs_f64(self.rate),
            include_idle: !self.exclude_idle,
            timestamps: self.timestamp,
        })
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.config()?;
    let mut spy = PythonSpy::new(args.pid)?;
    let profile = sampler::run(&mut spy, &SystemClock, &config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if config.timestamps {
        output::render_timestamped(&profile, &mut out)?;
    } else {
        output::render_folded(&profile, config.include_idle, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // --help/--version land here too; those are not failures.
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = err.print();
            return code;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pystacker: {err:#}");
            ExitCode::FAILURE
        }
    }
}
