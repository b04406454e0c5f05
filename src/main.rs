use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod charts;
mod clustering;
mod error;
mod loader;
mod maps;
mod models;
mod processor;
mod report;
mod settings;
mod views;

use crate::loader::{DataSource, DatasetCache};
use crate::maps::HeatParams;
use crate::models::{ClusterParams, Dataset};
use crate::processor::{GroupKey, Predicate, TimeBucket};
use crate::settings::Settings;
use crate::views::{View, ViewContext, ViewOptions};

#[derive(Parser)]
#[command(name = "crime-spots")]
#[command(about = "DBSCAN crime hotspots in San Francisco incident data", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, env = "CRIME_SPOTS_CONFIG")]
    config: Option<PathBuf>,
    /// Log at debug level when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TuningArgs {
    /// Neighbourhood radius in scaled coordinate units
    #[arg(long)]
    eps: Option<f64>,
    #[arg(long)]
    min_samples: Option<usize>,
    /// Maximum number of incidents to sample before clustering
    #[arg(long)]
    sample_size: Option<usize>,
}

impl TuningArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(eps) = self.eps {
            settings.eps = eps;
        }
        if let Some(min_samples) = self.min_samples {
            settings.min_samples = min_samples;
        }
        if let Some(sample_size) = self.sample_size {
            settings.sample_size = sample_size;
        }
    }
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long, value_delimiter = ',')]
    category: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    district: Vec<String>,
    /// Extra filter in the form field=value1,value2
    #[arg(long = "filter")]
    filters: Vec<String>,
}

impl FilterArgs {
    fn predicates(&self) -> anyhow::Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        if !self.category.is_empty() {
            predicates.push(Predicate::new("category", self.category.clone())?);
        }
        if !self.district.is_empty() {
            predicates.push(Predicate::new("district", self.district.clone())?);
        }
        for raw in &self.filters {
            predicates.push(Predicate::parse(raw)?);
        }
        Ok(predicates)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dataset profile
    Overview,
    /// Count incidents per category, district, resolution or time bucket
    Aggregate {
        /// category, district, resolution, day, hour, month or year
        #[arg(long)]
        by: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Run DBSCAN and print quality metrics with the largest clusters
    Cluster {
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Render one dashboard view to a file
    Render {
        /// View name, e.g. categories, clusters-with-noise, heat-map
        #[arg(long)]
        view: String,
        #[command(flatten)]
        tuning: TuningArgs,
        #[command(flatten)]
        filters: FilterArgs,
        /// Point cap for marker maps, row count for the records view
        #[arg(long)]
        limit: Option<usize>,
        /// Records view: seeded random rows instead of the first rows
        #[arg(long)]
        random: bool,
        /// Records view: run DBSCAN and add a cluster column
        #[arg(long)]
        with_clusters: bool,
        #[arg(long, default_value_t = 15)]
        radius: u32,
        #[arg(long, default_value_t = 15)]
        blur: u32,
        #[arg(long, default_value_t = 5.0)]
        max_intensity: f64,
        #[arg(long)]
        out: PathBuf,
    },
    /// Generate a markdown summary report
    Report {
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "crime_spots=debug"
    } else {
        "crime_spots=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cluster_params(settings: &Settings) -> anyhow::Result<ClusterParams> {
    let params = ClusterParams {
        epsilon: settings.eps,
        min_samples: settings.min_samples,
    };
    clustering::validate_params(&params)?;
    Ok(params)
}

fn narrow(dataset: Arc<Dataset>, predicates: &[Predicate]) -> Arc<Dataset> {
    if predicates.is_empty() {
        dataset
    } else {
        Arc::new(processor::filter(&dataset, predicates))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    let cache = DatasetCache::new(&settings).context("failed to build the HTTP client")?;
    let source = DataSource::parse(&settings.data_url);

    match cli.command {
        Commands::Overview => {
            let dataset = cache.load(&source, None).await?;
            if dataset.is_empty() {
                println!("No incidents found in {}.", dataset.source);
                return Ok(());
            }

            let profile = processor::profile(&dataset);
            let grid = processor::density_grid(&dataset, 10);

            println!("Dataset overview for {}:", dataset.source);
            println!("- Records: {}", profile.record_count);
            println!("- Crime categories: {}", profile.category_count);
            println!("- Police districts: {}", profile.district_count);
            println!("- Missing district: {}", profile.missing_district);
            for (label, group) in [
                ("Most common crime", &profile.top_category),
                ("Busiest district", &profile.top_district),
                ("Peak day", &profile.peak_day),
            ] {
                if let Some(group) = group {
                    println!("- {label}: {} ({})", group.key, group.count);
                }
            }
            println!(
                "- Density grid: max {} per cell, {:.1} per cell on average",
                grid.max_cell, grid.mean_per_cell
            );
        }
        Commands::Aggregate { by, limit, filters } => {
            let key: GroupKey = by.parse()?;
            let predicates = filters.predicates()?;
            let dataset = narrow(cache.load(&source, None).await?, &predicates);

            let mut groups = processor::aggregate(&dataset, key);
            if key == GroupKey::Time(TimeBucket::DayOfWeek) {
                groups = processor::in_weekday_order(&groups);
            }

            if groups.is_empty() {
                println!("No incidents match this selection.");
                return Ok(());
            }

            println!("Incidents by {by}:");
            for group in processor::top_n(groups, limit) {
                println!(
                    "- {}: {} ({:.1}%)",
                    group.key,
                    group.count,
                    group.share * 100.0
                );
            }
        }
        Commands::Cluster { tuning, limit } => {
            tuning.apply(&mut settings);
            let params = cluster_params(&settings)?;
            let dataset = cache.load(&source, Some(settings.sample_size)).await?;
            let (labeled, metrics) = clustering::cluster(
                &dataset,
                params,
                settings.scaling,
                settings.silhouette_max_points,
            )?;

            println!(
                "DBSCAN eps {} / min_samples {} over {} incidents:",
                params.epsilon, params.min_samples, metrics.total_points
            );
            println!("- Clusters: {}", metrics.cluster_count);
            println!(
                "- Noise: {} ({:.1}%)",
                metrics.noise_count,
                metrics.noise_ratio * 100.0
            );
            match metrics.silhouette {
                Some(score) => println!("- Silhouette: {score:.3}"),
                None => println!("- Silhouette: n/a"),
            }

            let summaries = processor::summarize_clusters(&labeled);
            if summaries.is_empty() {
                println!("No clusters found. Try a larger --eps or a smaller --min-samples.");
                return Ok(());
            }

            println!("Largest clusters:");
            for summary in summaries.iter().take(limit) {
                println!(
                    "- Cluster {}: {} incidents around ({:.4}, {:.4}), mostly {}",
                    summary.cluster_id,
                    summary.member_count,
                    summary.center_latitude,
                    summary.center_longitude,
                    summary.dominant_category
                );
            }
        }
        Commands::Render {
            view,
            tuning,
            filters,
            limit,
            random,
            with_clusters,
            radius,
            blur,
            max_intensity,
            out,
        } => {
            let sample_override = tuning.sample_size;
            tuning.apply(&mut settings);
            let options = ViewOptions {
                limit,
                heat: HeatParams {
                    radius,
                    blur,
                    max_intensity,
                },
                random,
                with_clusters,
            };
            let selected = View::from_name(&view, &options, &settings)?;
            let predicates = filters.predicates()?;
            let params = if selected.needs_clustering() {
                Some(cluster_params(&settings)?)
            } else {
                None
            };
            let cap = sample_override.or_else(|| selected.default_sample_size(&settings));

            let dataset = narrow(cache.load(&source, cap).await?, &predicates);
            let boundaries = if selected.needs_boundaries() {
                let boundaries = cache
                    .load_boundaries(&DataSource::parse(&settings.boundary_url))
                    .await?;
                tracing::debug!(
                    source = %boundaries.source,
                    regions = ?boundaries.region_names(),
                    "boundary regions"
                );
                Some(boundaries)
            } else {
                None
            };
            let clustered = match params {
                Some(params) => Some(clustering::cluster(
                    &dataset,
                    params,
                    settings.scaling,
                    settings.silhouette_max_points,
                )?),
                None => None,
            };

            let ctx = ViewContext {
                settings: &settings,
                dataset: &dataset,
                clustering: clustered.as_ref().map(|(labeled, metrics)| (labeled, metrics)),
                boundaries: boundaries.as_deref(),
            };
            let rendered = views::render(selected, &ctx)?;

            let extension = rendered.file_extension();
            if out.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                tracing::warn!(
                    path = %out.display(),
                    expected = extension,
                    "output extension does not match the rendered format"
                );
            }
            rendered.write_to(&out)?;
            println!("Rendered {view} ({extension}) to {}.", out.display());
        }
        Commands::Report { tuning, out } => {
            tuning.apply(&mut settings);
            let params = cluster_params(&settings)?;
            let dataset = cache.load(&source, Some(settings.sample_size)).await?;
            let (labeled, metrics) = clustering::cluster(
                &dataset,
                params,
                settings.scaling,
                settings.silhouette_max_points,
            )?;

            let report = report::build_report(&dataset, &labeled, &metrics);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
