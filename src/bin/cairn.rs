use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use cairn::bounds::{Bounds, Delta, Point};
use cairn::builder::{merge, Builder};
use cairn::cesium::CesiumSettings;
use cairn::endpoint::Endpoint;
use cairn::error::IndexError;
use cairn::executor::Executor;
use cairn::metadata::{MetadataConfig, Reprojection};
use cairn::manifest::Manifest;
use cairn::schema::{self, Schema};
use cairn::structure::StructureConfig;
use cairn::subset::Subset;
use cairn::format::FormatConfig;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Out-of-core point cloud indexing")]
struct Cli {
    #[command(subcommand)]
    kernel: Kernel,
}

#[derive(Subcommand)]
enum Kernel {
    /// Build an index from a set of input files.
    Build(BuildArgs),
    /// Merge colocated subset builds into a whole.
    Merge {
        /// Output path holding the subset builds.
        output: String,
    },
    /// Scan inputs and report their bounds and point count.
    Infer {
        /// Input files or directories.
        input: Vec<String>,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Optional config JSON; flags below override its values.
    config: Option<PathBuf>,

    /// Input file or directory (repeatable).
    #[arg(short, long)]
    input: Vec<String>,

    /// Output directory.
    #[arg(short, long)]
    output: Option<String>,

    /// Directory for temporary files.
    #[arg(short = 'a', long)]
    tmp: Option<String>,

    /// Index bounds as xmin,ymin,zmin,xmax,ymax,zmax. Inferred by scanning
    /// the inputs when absent.
    #[arg(short, long)]
    bounds: Option<String>,

    /// Worker thread count.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Overwrite instead of continuing a previous build.
    #[arg(short, long)]
    force: bool,

    /// Stop after this many inserted files.
    #[arg(short = 'g', long)]
    run_count: Option<u64>,

    /// Scale factor for quantized output.
    #[arg(short, long)]
    scale: Option<f64>,

    /// Disable chunk compression.
    #[arg(long)]
    no_compress: bool,

    /// Build one subset of a sharded index, as id/of (one-based).
    #[arg(long)]
    subset: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.kernel {
        Kernel::Build(args) => build(args),
        Kernel::Merge { output } => run_merge(&output),
        Kernel::Infer { input } => infer(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cairn: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build(args: BuildArgs) -> Result<(), IndexError> {
    let config: Value = match &args.config {
        Some(path) => serde_json::from_slice(
            &std::fs::read(path).map_err(|e| IndexError::input(format!("{}: {e}", path.display())))?,
        )
        .map_err(|e| IndexError::input(format!("bad config: {e}")))?,
        None => Value::Object(Default::default()),
    };

    let output = args
        .output
        .or_else(|| string_key(&config, "output"))
        .ok_or_else(|| IndexError::input("no output path given"))?;
    let tmp = args
        .tmp
        .or_else(|| string_key(&config, "tmp"))
        .unwrap_or_else(|| "tmp".to_string());
    let threads = args
        .threads
        .or_else(|| config.get("threads").and_then(Value::as_u64).map(|v| v as usize))
        .unwrap_or(8);

    let mut inputs: Vec<String> = args.input.clone();
    if inputs.is_empty() {
        match config.get("input") {
            Some(Value::String(s)) => inputs.push(s.clone()),
            Some(Value::Array(a)) => {
                inputs.extend(a.iter().filter_map(Value::as_str).map(String::from))
            }
            _ => {}
        }
    }
    let paths = expand_inputs(&inputs)?;
    if paths.is_empty() {
        return Err(IndexError::input("no input files found"));
    }

    let schema: Schema = match config.get("schema") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| IndexError::input(format!("bad schema: {e}")))?,
        None => schema::xyz(),
    };

    let structure: StructureConfig = match config.get("structure") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| IndexError::input(format!("bad structure: {e}")))?,
        None => StructureConfig::default(),
    };

    let delta = match args.scale {
        Some(s) => Some(Delta::new(Point::splat(s), Point::ZERO)),
        None => match (config.get("scale"), config.get("offset")) {
            (None, None) => None,
            (scale, offset) => Some(Delta::new(
                point_value(scale, Point::ONE)?,
                point_value(offset, Point::ZERO)?,
            )),
        },
    };

    let subset = match args.subset.as_deref().map(parse_subset) {
        Some(parsed) => Some(parsed?),
        None => match config.get("subset") {
            Some(v) => Some(
                serde_json::from_value(v.clone())
                    .map_err(|e| IndexError::input(format!("bad subset: {e}")))?,
            ),
            None => None,
        },
    };

    let bounds_native = match args.bounds.as_deref() {
        Some(text) => parse_bounds(text)?,
        None => match config.get("bounds") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| IndexError::input(format!("bad bounds: {e}")))?,
            None => infer_bounds(&paths, &schema)?,
        },
    };

    let mut format = FormatConfig::default();
    if args.no_compress || config.get("compress").and_then(Value::as_bool) == Some(false) {
        format.compress = false;
    }

    let reprojection: Option<Reprojection> = match config.get("reprojection") {
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| IndexError::input(format!("bad reprojection: {e}")))?,
        ),
        None => None,
    };

    let cesium: Option<CesiumSettings> = match config.get("formats").and_then(|f| f.get("cesium")) {
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| IndexError::input(format!("bad cesium settings: {e}")))?,
        ),
        None => None,
    };

    let metadata = MetadataConfig {
        bounds_native,
        schema,
        structure,
        hierarchy_structure: None,
        manifest: Manifest::new(paths),
        format,
        delta,
        reprojection,
        subset,
        transformation: None,
        cesium,
    };

    let mut builder = Builder::create(
        metadata,
        Endpoint::fs(output),
        Endpoint::fs(tmp),
        threads,
        args.force,
    )?;
    builder.go(args.run_count.unwrap_or(0))?;

    let stats = builder.point_stats();
    println!(
        "inserts: {}, out of bounds: {}, overflows: {}",
        stats.inserts, stats.out_of_bounds, stats.overflows
    );
    Ok(())
}

fn run_merge(output: &str) -> Result<(), IndexError> {
    let stats = merge(&Endpoint::fs(output))?;
    println!(
        "merged; inserts: {}, out of bounds: {}, overflows: {}",
        stats.inserts, stats.out_of_bounds, stats.overflows
    );
    Ok(())
}

fn infer(inputs: &[String]) -> Result<(), IndexError> {
    let paths = expand_inputs(inputs)?;
    if paths.is_empty() {
        return Err(IndexError::input("no input files found"));
    }

    let schema = schema::xyz();
    let bounds = infer_bounds(&paths, &schema)?;
    let num_points: u64 = paths
        .iter()
        .map(|p| {
            std::fs::metadata(p)
                .map(|m| m.len() / schema.point_size() as u64)
                .unwrap_or(0)
        })
        .sum();

    let doc = serde_json::json!({
        "numPoints": num_points,
        "bounds": bounds,
        "schema": schema,
        "input": paths,
    });
    println!("{}", serde_json::to_string_pretty(&doc).expect("valid json"));
    Ok(())
}

/// Files pass through; directories contribute their readable entries.
fn expand_inputs(inputs: &[String]) -> Result<Vec<String>, IndexError> {
    let mut out = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if path.is_dir() {
            let mut entries: Vec<String> = std::fs::read_dir(path)
                .map_err(|e| IndexError::input(format!("{input}: {e}")))?
                .filter_map(|e| e.ok())
                .map(|e| e.path().to_string_lossy().into_owned())
                .filter(|p| Executor::good(p))
                .collect();
            entries.sort();
            out.extend(entries);
        } else {
            out.push(input.clone());
        }
    }
    Ok(out)
}

fn infer_bounds(paths: &[String], schema: &Schema) -> Result<Bounds, IndexError> {
    let mut union: Option<Bounds> = None;
    for path in paths {
        if !Executor::good(path) {
            continue;
        }
        let bytes =
            std::fs::read(path).map_err(|e| IndexError::input(format!("{path}: {e}")))?;
        let preview = Executor::preview(&bytes, schema)?;
        union = Some(match union {
            Some(b) => Bounds::new(
                b.min().min(preview.bounds.min()),
                b.max().max(preview.bounds.max()),
            ),
            None => preview.bounds,
        });
    }
    union.ok_or_else(|| IndexError::input("no readable inputs to infer bounds from"))
}

fn parse_bounds(text: &str) -> Result<Bounds, IndexError> {
    let parts: Vec<f64> = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| IndexError::input(format!("bad bounds: {e}")))?;
    if parts.len() != 6 {
        return Err(IndexError::input("bounds need exactly six values"));
    }
    Ok(Bounds::new(
        Point::new(parts[0], parts[1], parts[2]),
        Point::new(parts[3], parts[4], parts[5]),
    ))
}

fn parse_subset(text: &str) -> Result<Subset, IndexError> {
    let (id, of) = text
        .split_once('/')
        .ok_or_else(|| IndexError::input("subset must be id/of, e.g. 1/4"))?;
    let id = id
        .parse()
        .map_err(|e| IndexError::input(format!("bad subset id: {e}")))?;
    let of = of
        .parse()
        .map_err(|e| IndexError::input(format!("bad subset count: {e}")))?;
    Subset::from_one_based(id, of)
}

fn string_key(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(String::from)
}

fn point_value(value: Option<&Value>, default: Point) -> Result<Point, IndexError> {
    match value {
        None => Ok(default),
        Some(Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(1.0);
            Ok(Point::splat(v))
        }
        Some(v) => {
            let arr: [f64; 3] = serde_json::from_value(v.clone())
                .map_err(|e| IndexError::input(format!("bad scale/offset: {e}")))?;
            Ok(Point::from_array(arr))
        }
    }
}
