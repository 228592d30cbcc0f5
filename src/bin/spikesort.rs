/// spikesort: sort one or more electrodes from a raw-trace safetensors file.
///
/// Input tensors are named `<prefix><N>` (`electrode0`, `electrode1`, …),
/// each shaped `[T]` or `[1, T]`; an optional `sampling_rate` scalar
/// overrides the configured rate. Artifacts land in
/// `<output>/electrode<NN>/<group>.safetensors`.
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use spikesort::{sort_electrodes, ElectrodeOutcome, RawTrace, SafetensorsSink, SortConfig};

#[derive(Parser, Debug)]
#[command(name = "spikesort", about = "Offline per-electrode spike sorting")]
struct Args {
    /// Raw-trace safetensors file.
    #[arg(long)]
    input: PathBuf,

    /// Output root directory.
    #[arg(long)]
    output: PathBuf,

    /// Electrode numbers to sort (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    electrodes: Vec<usize>,

    /// Tensor name prefix; the electrode number is appended.
    #[arg(long, default_value = "electrode")]
    prefix: String,

    /// JSON file overriding any subset of the default parameters.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `max_clusters`.
    #[arg(long)]
    max_clusters: Option<usize>,

    /// Worker threads (default: one per core).
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => SortConfig::from_json_file(path)?,
        None => SortConfig::default(),
    };
    if let Some(k) = args.max_clusters {
        cfg.max_clusters = k;
    }

    let mut traces = Vec::with_capacity(args.electrodes.len());
    for &e in &args.electrodes {
        let key = format!("{}{e}", args.prefix);
        let raw = RawTrace::load(&args.input, &key)?;
        if let Some(fs) = raw.sampling_rate {
            if (fs - cfg.sampling_rate).abs() > 1e-3 {
                log::info!("using sampling rate {fs} Hz from {}", args.input.display());
                cfg.sampling_rate = fs;
            }
        }
        println!("Loaded {key}: {} samples", raw.samples.len());
        traces.push((e, raw.samples));
    }
    cfg.validate()?;

    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("configuring worker pool")?;
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let results = sort_electrodes(&traces, &cfg, |e| SafetensorsSink::create(&args.output, e))?;

    let mut failed = 0;
    for (e, run) in results {
        match run {
            Ok((ElectrodeOutcome::Sorted(s), sink)) => println!(
                "electrode {e}: {} spikes, solved k={:?}, skipped k={:?}, lowest BIC k={:?} → {}",
                s.n_spikes,
                s.solved,
                s.skipped,
                s.lowest_bic,
                sink.dir().display()
            ),
            Ok((ElectrodeOutcome::Empty { reason, cutoff }, _)) => {
                println!("electrode {e}: nothing to sort ({reason:?}, cutoff {cutoff})")
            }
            Err(err) => {
                eprintln!("electrode {e}: {err}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} electrode(s) failed");
    }
    Ok(())
}
