use anyhow::{Context, Result};
use msurv::cli::{parse_args, setup_logging, Commands, CompareArgs, IngestArgs, ModelsArgs, PatchArgs, PipelineConfig};
use msurv::compare::{compare_tables, CompareOptions};
use msurv::data::loader::TableLoader;
use msurv::ingest::{Ingester, JsonDirStore, Modality};
use msurv::model::{build_summaries, FusionMethod, SubModelsConfig};
use msurv::wsi::{discover_slides, OfflinePatcher, PatchConfig, SamplingMode};
use msurv::DefaultBackend;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", msurv::info());

    let result = PipelineConfig::load(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Compare(args) => run_compare(args, &config),
        Commands::Patch(args) => run_patch(args, &config),
        Commands::Ingest(args) => run_ingest(args, &config),
        Commands::Models(args) => run_models(args, &config),
    });

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_compare(args: CompareArgs, config: &PipelineConfig) -> Result<()> {
    let options = CompareOptions {
        key: args.key.unwrap_or_else(|| config.compare.key.clone()),
        ignore_columns: if args.ignore.is_empty() {
            config.compare.ignore.clone()
        } else {
            args.ignore
        },
    };

    info!("Comparing {:?} with {:?} on `{}`", args.table1, args.table2, options.key);

    let loader = TableLoader::new();
    let table1 = loader
        .load(&args.table1)
        .with_context(|| format!("Failed to load {:?}", args.table1))?
        .keyed_by(&options.key)?;
    let table2 = loader
        .load(&args.table2)
        .with_context(|| format!("Failed to load {:?}", args.table2))?
        .keyed_by(&options.key)?;

    let result = compare_tables(&table1, &table2, &options);
    result.print_summary();
    result.print_column_summary();

    if let Some(column) = &args.column {
        let ids = result.ids_with_column_difference(column);
        println!("\nPatients differing in '{}' ({}):", column, ids.len());
        for id in ids {
            println!("  {}", id);
        }
    }

    if let Some(output) = args.output.or_else(|| config.compare.report.clone()) {
        result.write_report(&output)?;
        info!("Report saved to: {:?}", output);
    }

    Ok(())
}

fn run_patch(args: PatchArgs, config: &PipelineConfig) -> Result<()> {
    let defaults = &config.patch;
    let size = args.size.unwrap_or(defaults.size);
    let n = args.n.unwrap_or(defaults.patches_per_slide);

    let mode = if args.tissue {
        SamplingMode::Tissue
    } else {
        SamplingMode::Annotated {
            target_class: args.target_class.unwrap_or(defaults.target_class),
            min_class_area_ratio: args.min_class_area_ratio.unwrap_or(defaults.min_class_area_ratio),
        }
    };
    if !args.tissue && args.annotations.is_none() {
        warn!("No annotation directory given; annotated sampling will skip every slide");
    }

    let patch_config = PatchConfig {
        level: args.level.unwrap_or(defaults.level),
        size: (size, size),
        mode,
        return_annotation: false,
    };

    let slides = discover_slides(&args.slides, args.annotations.as_deref())?;
    let patcher = OfflinePatcher::new(slides, &args.output, patch_config, args.seed.or(defaults.seed))?;

    let interrupt = patcher.interrupt_handle();
    ctrlc::set_handler(move || {
        interrupt.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let summary = patcher.run(n)?;
    if summary.interrupted {
        warn!("Stopped early: {} patches saved", summary.saved);
    }
    for name in &summary.failed_slides {
        warn!("Incomplete: {}", name);
    }
    info!("Patches saved to: {:?}", patcher.target_dir());

    Ok(())
}

fn run_ingest(args: IngestArgs, config: &PipelineConfig) -> Result<()> {
    let names = if args.modality.is_empty() {
        config.ingest.modalities.clone()
    } else {
        args.modality
    };
    let modalities = if names.is_empty() {
        Modality::ALL.to_vec()
    } else {
        names
            .iter()
            .map(|name| Modality::parse(name).with_context(|| format!("Unknown modality: {}", name)))
            .collect::<Result<Vec<_>>>()?
    };

    info!("Ingesting {:?} into {:?}", args.base, args.store);

    let store = JsonDirStore::new(&args.store)?;
    let mut ingester = Ingester::new(&args.base, store).with_modalities(modalities);
    let summary = ingester.run()?;
    summary.print();

    Ok(())
}

fn run_models(args: ModelsArgs, config: &PipelineConfig) -> Result<()> {
    let fusion: FusionMethod = args
        .fusion
        .as_deref()
        .unwrap_or(config.models.fusion.as_str())
        .parse()?;

    let models_config = SubModelsConfig::new(fusion)
        .with_output_size(args.output_size.unwrap_or(config.models.output_size))
        .with_n_genes(args.genes.unwrap_or(config.models.n_genes))
        .with_seed(args.seed.or(config.models.seed));

    let device = <DefaultBackend as burn::tensor::backend::Backend>::Device::default();

    info!("Building sub-models...");
    let summaries = build_summaries::<DefaultBackend>(&models_config, &device)?;

    println!("\n=== Sub-models ===");
    for s in &summaries {
        println!(
            "{:<18} params: {:>12}  output: {:?}",
            s.name,
            msurv::utils::format_number(s.parameters),
            s.output_dims
        );
    }
    println!("==================\n");

    Ok(())
}
