use clap::Parser;
use heatlook::session::{Rendered, Session, Snapshot, Trigger};
use heatlook::{
    scene, Comparison, DirectorySource, HeatmapConfig, HeatmapError, LegendSelection,
    SampleMetadata,
};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "heatlook")]
#[command(about = "Draw a clustered expression heatmap with metadata tracks.", long_about = None)]
struct Args {
    // MANDATORY OPTIONS
    /// Sample metadata TSV: sample id in the first column, plus a `condition` column.
    #[arg(short = 'm', long = "metadata", value_name = "FILE")]
    metadata: PathBuf,

    /// Directory holding one `<feature>.tsv` (sample, value) file per feature.
    #[arg(short = 'd', long = "counts-dir", value_name = "DIR")]
    counts_dir: PathBuf,

    /// Comma-separated features to draw.
    #[arg(short = 'g', long = "features", value_name = "LIST", value_delimiter = ',')]
    features: Vec<String>,

    /// Write the heatmap to this FILE (PNG or SVG based on extension), or into this DIR.
    #[arg(short = 'o', long = "out", value_name = "FILE|DIR")]
    out: PathBuf,

    // Tracks and configuration
    /// Comma-separated metadata columns to show as tracks below the condition track.
    #[arg(short = 'a', long = "annotations", value_name = "LIST", value_delimiter = ',')]
    annotations: Vec<String>,

    /// JSON configuration (palette, gradients, condition order, geometry).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    // Clustering
    /// Order samples by condition instead of clustering them.
    #[arg(long = "no-cluster-samples")]
    no_cluster_samples: bool,

    /// Keep features in the given order.
    #[arg(long = "no-cluster-features")]
    no_cluster_features: bool,

    // Visibility
    /// Show only the two conditions of this comparison, e.g. `ctrl-vs-treated`.
    #[arg(long = "comparison-only", value_name = "A-vs-B")]
    comparison_only: Option<String>,

    /// Hide samples of this condition (repeatable).
    #[arg(long = "hide", value_name = "COND")]
    hide: Vec<String>,

    /// Leave hidden conditions out of the legend instead of dimming them.
    #[arg(long = "hide-unselected")]
    hide_unselected: bool,

    // Sizing
    /// Width in pixels (must lie within the computed bounds).
    #[arg(short = 'x', long = "width", value_name = "N")]
    width: Option<u32>,

    /// Height in pixels (must lie within the computed bounds).
    #[arg(short = 'y', long = "height", value_name = "N")]
    height: Option<u32>,

    // Threading
    /// Number of threads to use for parallel operations.
    #[arg(short = 't', long = "threads", value_name = "N")]
    threads: Option<usize>,

    // Logging
    /// Verbosity level (0 = error, 1 = info, 2 = debug).
    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 1)]
    verbose: u8,
}

impl Args {
    /// Options replayed as interactions, in the order a user would make them.
    fn triggers(&self) -> Result<Vec<Trigger>, HeatmapError> {
        let mut triggers = vec![Trigger::SelectFeatures(self.features.clone())];
        if !self.annotations.is_empty() {
            triggers.push(Trigger::SetAnnotations(self.annotations.clone()));
        }
        for condition in &self.hide {
            triggers.push(Trigger::ToggleCondition(condition.clone()));
        }
        if let Some(c) = &self.comparison_only {
            triggers.push(Trigger::SetComparisonOnly(Some(Comparison::parse(c)?)));
        }
        if self.hide_unselected {
            triggers.push(Trigger::SetHideUnselected(true));
        }
        if self.width.is_some() || self.height.is_some() {
            triggers.push(Trigger::Resize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(triggers)
    }
}

#[derive(Serialize)]
struct LegendReport<'a> {
    export: &'a scene::ExportDescriptor,
    legend: &'a LegendSelection,
    placeholder: Option<&'a str>,
}

/// Write leaf orders to a TSV file next to the image
fn write_order_tsv(output_path: &Path, snapshot: &Snapshot) {
    // foo.png -> foo.order.tsv
    let tsv_path = output_path.with_extension("order.tsv");

    let mut content = String::from("axis\tposition\tidentifier\n");
    for (pos, feature) in snapshot.matrix.features().iter().enumerate() {
        content.push_str(&format!("feature\t{}\t{}\n", pos, feature));
    }
    for (pos, sample) in snapshot.matrix.samples().iter().enumerate() {
        content.push_str(&format!("sample\t{}\t{}\n", pos, sample));
    }

    match std::fs::write(&tsv_path, content) {
        Ok(_) => info!("Leaf orders saved to {:?}", tsv_path),
        Err(e) => warn!("Could not write order TSV: {}", e),
    }
}

fn write_legend_json(output_path: &Path, rendered: &Rendered) -> Result<(), HeatmapError> {
    let json_path = output_path.with_extension("legend.json");
    let report = LegendReport {
        export: &rendered.export,
        legend: &rendered.legend,
        placeholder: rendered.placeholder.as_deref(),
    };
    std::fs::write(&json_path, serde_json::to_string_pretty(&report)?)?;
    info!("Legend saved to {:?}", json_path);
    Ok(())
}

fn run(args: &Args) -> Result<(), HeatmapError> {
    let mut config = match &args.config {
        Some(path) => HeatmapConfig::from_json_file(path)?,
        None => HeatmapConfig::default(),
    };
    if args.no_cluster_samples {
        config.cluster_samples = false;
    }
    if args.no_cluster_features {
        config.cluster_features = false;
    }

    let metadata = SampleMetadata::from_tsv(&args.metadata)?;
    info!(
        "Loaded {} samples in {} conditions",
        metadata.len(),
        metadata.condition_labels().len()
    );
    let source = DirectorySource::new(&args.counts_dir);
    let mut session = Session::new(config, metadata, Box::new(source))?;

    let mut last = None;
    for trigger in args.triggers()? {
        let rendered = session.dispatch_or_placeholder(trigger)?;
        let stop = rendered.placeholder.is_some();
        last = Some(rendered);
        if stop {
            break;
        }
    }
    let rendered =
        last.ok_or_else(|| HeatmapError::Internal("no trigger was dispatched".to_string()))?;

    let out = if args.out.is_dir() {
        args.out.join(&rendered.export.filename)
    } else {
        args.out.clone()
    };

    if let Some(message) = &rendered.placeholder {
        warn!("Writing placeholder: {}", message);
    }
    scene::write_scene(&rendered.scene, &out)?;
    write_legend_json(&out, &rendered)?;
    if rendered.placeholder.is_none() {
        if let Some(snapshot) = session.snapshot() {
            write_order_tsv(&out, &snapshot);
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    info!("Starting heatmap...");

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("Done.");
}
