use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use formats::FormatError;
use formats::dat::{Catalog, FlagValue, ThingFlag};
use formats::spr::SpriteAtlas;
use indicatif::{ProgressBar, ProgressStyle};
use item_manager_lib::color::{light_color_to_minimap, light_color_to_rgb, minimap_color_to_rgb};
use item_manager_lib::logging;
use item_manager_lib::worker::{self, Job, WorkerEvent};
use item_manager_lib::{
    Editor, FlagState, NumericField, NumericState, ReindexConfirmation, Settings, parse_ids,
};
use optimizer::{ApplyOptions, ScanReport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "item-manager")]
#[command(about = "Edit and optimize object catalogs (.dat) and sprite atlases (.spr)")]
struct Cli {
    /// Catalog file; defaults to `catalog_path` from the settings file.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Sprite atlas; defaults to `atlas_path` from the settings file.
    #[arg(long, global = true)]
    atlas: Option<PathBuf>,

    /// Hide progress bars.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print header counts of the catalog and atlas.
    Info,
    /// List flag names and numeric field names.
    Flags,
    /// Show the properties of a selection, e.g. "100, 105-110".
    Query { ids: String },
    /// Mark flags present on every selected item.
    Set {
        ids: String,
        #[arg(required = true)]
        flags: Vec<String>,
    },
    /// Remove flags from every selected item.
    Unset {
        ids: String,
        #[arg(required = true)]
        flags: Vec<String>,
    },
    /// Write the same literal value(s) to one numeric field of every selected item.
    Numeric {
        ids: String,
        field: String,
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,
    },
    /// Append empty items up to the highest given id.
    Insert { ids: String },
    /// Delete items and renumber everything after them.
    Delete {
        ids: String,
        /// Confirm that every later id shifts down.
        #[arg(long)]
        reindex: bool,
    },
    /// Decode one sprite.
    Sprite {
        id: u32,
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Find duplicate and empty sprites.
    Scan {
        /// Save the scan so `optimize --report` can apply it later.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Remap duplicate sprites across the catalog and clean the atlas.
    Optimize {
        /// Apply a saved scan instead of scanning again.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Keep payloads of remapped sprites.
        #[arg(long)]
        keep_payloads: bool,
        /// Leave outfits, effects and missiles untouched.
        #[arg(long)]
        items_only: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init();
    let settings = Settings::load();
    log.set_level(&settings.log_level);

    let bars = settings.progress_bars && !cli.quiet;
    let catalog_path = cli.catalog.clone().or_else(|| settings.catalog_path.clone());
    let atlas_path = cli.atlas.clone().or_else(|| settings.atlas_path.clone());

    match cli.command {
        Commands::Info => info(catalog_path, atlas_path),
        Commands::Flags => {
            print_flags();
            Ok(())
        }
        Commands::Query { ids } => {
            let editor = open(catalog_path)?;
            print_selection(&editor, &parse_ids(&ids)?);
            Ok(())
        }
        Commands::Set { ids, flags } => {
            let mut editor = open(catalog_path)?;
            let changed = editor.apply_changes(&parse_ids(&ids)?, &parse_flags(&flags)?, &[])?;
            finish_edit(&mut editor, changed, "changed")
        }
        Commands::Unset { ids, flags } => {
            let mut editor = open(catalog_path)?;
            let changed = editor.apply_changes(&parse_ids(&ids)?, &[], &parse_flags(&flags)?)?;
            finish_edit(&mut editor, changed, "changed")
        }
        Commands::Numeric { ids, field, values } => {
            let field = NumericField::from_name(&field)
                .with_context(|| format!("unknown numeric field '{field}'"))?;
            let mut editor = open(catalog_path)?;
            let changed = editor.apply_numeric(&parse_ids(&ids)?, field, &values)?;
            finish_edit(&mut editor, changed, "changed")
        }
        Commands::Insert { ids } => {
            let mut editor = open(catalog_path)?;
            let inserted = editor.insert_ids(&parse_ids(&ids)?)?;
            finish_edit(&mut editor, inserted, "inserted")
        }
        Commands::Delete { ids, reindex } => {
            if !reindex {
                bail!("deleting renumbers every later item; pass --reindex to confirm");
            }
            let mut editor = open(catalog_path)?;
            let deleted = editor.delete_ids(&parse_ids(&ids)?, ReindexConfirmation::acknowledge())?;
            finish_edit(&mut editor, deleted, "deleted")
        }
        Commands::Sprite { id, png } => sprite(atlas_path, id, png.as_deref()),
        Commands::Scan { report } => {
            let path = atlas_path.context("no atlas given; pass --atlas or set atlas_path")?;
            let atlas = SpriteAtlas::load(&path).with_context(|| format!("loading {path:?}"))?;
            let (_, scan) = drive(worker::spawn_scan(atlas), bars, "scan")?;
            print_scan(&scan);
            if let Some(report) = report {
                scan.save(&report)
                    .with_context(|| format!("saving scan report to {report:?}"))?;
                println!("Scan report saved to {}", report.display());
            }
            Ok(())
        }
        Commands::Optimize {
            report,
            keep_payloads,
            items_only,
        } => {
            let options = ApplyOptions {
                clean_empty: settings.clean_empty && !keep_payloads,
                patch_tail: !items_only,
            };
            optimize(catalog_path, atlas_path, report, options, bars)
        }
    }
}

fn open(catalog_path: Option<PathBuf>) -> Result<Editor> {
    let path = catalog_path.context("no catalog given; pass --catalog or set catalog_path")?;
    Editor::open(&path).with_context(|| format!("loading {path:?}"))
}

fn finish_edit(editor: &mut Editor, count: usize, verb: &str) -> Result<()> {
    println!("{count} item(s) {verb}");
    if editor.is_dirty() {
        editor.save_catalog(None)?;
    }
    Ok(())
}

fn parse_flags(names: &[String]) -> Result<Vec<ThingFlag>> {
    names
        .iter()
        .map(|name| ThingFlag::from_name(name).with_context(|| format!("unknown flag '{name}'")))
        .collect()
}

fn info(catalog_path: Option<PathBuf>, atlas_path: Option<PathBuf>) -> Result<()> {
    if catalog_path.is_none() && atlas_path.is_none() {
        bail!("nothing to inspect; pass --catalog and/or --atlas");
    }
    if let Some(path) = catalog_path {
        let catalog = Catalog::load(&path).with_context(|| format!("loading {path:?}"))?;
        let counts = catalog.counts();
        println!("Catalog {}", path.display());
        println!("  signature  {:#010X}", catalog.signature);
        println!("  items      {}", counts.items);
        println!("  outfits    {}", counts.outfits);
        println!("  effects    {}", counts.effects);
        println!("  missiles   {}", counts.missiles);
    }
    if let Some(path) = atlas_path {
        let atlas = SpriteAtlas::load(&path).with_context(|| format!("loading {path:?}"))?;
        println!("Atlas {}", path.display());
        println!("  signature  {:#010X}", atlas.signature);
        println!("  sprites    {}", atlas.sprite_count());
    }
    Ok(())
}

fn print_flags() {
    println!("Flags:");
    for flag in ThingFlag::ALL {
        println!("  0x{:02X}  {:<16} {:?}", u8::from(flag), flag.name(), flag.shape());
    }
    println!("Numeric fields:");
    for field in NumericField::ALL {
        println!("  {:<16} {} value(s) -> {}", field.name(), field.arity(), field.flag().name());
    }
}

fn describe(flag: ThingFlag, value: &FlagValue) -> String {
    match value {
        FlagValue::Present => String::new(),
        FlagValue::Value(v) if flag == ThingFlag::ShowOnMinimap => {
            let [r, g, b] = minimap_color_to_rgb(*v);
            format!("{v} (#{r:02x}{g:02x}{b:02x})")
        }
        FlagValue::Value(v) => v.to_string(),
        FlagValue::Light { level, color } => {
            let [r, g, b] = light_color_to_rgb(*color);
            format!(
                "level {level}, color {color} (#{r:02x}{g:02x}{b:02x}, minimap {})",
                light_color_to_minimap(*color)
            )
        }
        FlagValue::Offset { x, y } => format!("({x}, {y})"),
        FlagValue::Market(market) => format!(
            "\"{}\" category {} trade-as {} show-as {} vocation {} level {}",
            String::from_utf8_lossy(&market.name),
            market.category,
            market.trade_as,
            market.show_as,
            market.restrict_vocation,
            market.required_level
        ),
    }
}

fn print_selection(editor: &Editor, ids: &[u16]) {
    let selection = editor.query(ids);
    if !selection.missing.is_empty() {
        println!("No item with id: {:?}", selection.missing);
    }
    if selection.is_empty() {
        return;
    }
    for record in &selection.records {
        println!("[{}] sprites {:?}", record.id, record.sprite_ids);
        for (flag, value) in record.props.iter() {
            println!("    {:<16} {}", flag.name(), describe(flag, value));
        }
    }

    if selection.records.len() > 1 {
        println!("Across {} items:", selection.records.len());
        for flag in ThingFlag::ALL {
            match selection.flag_state(flag) {
                FlagState::None => {}
                FlagState::All => println!("    {:<16} all", flag.name()),
                FlagState::Mixed => println!("    {:<16} some", flag.name()),
            }
        }
        for field in NumericField::ALL {
            match selection.numeric_state(field) {
                NumericState::Absent => {}
                NumericState::Uniform(value) => {
                    println!("    {:<16} = {}", field.name(), describe(field.flag(), &value))
                }
                NumericState::Mixed => println!("    {:<16} = (mixed)", field.name()),
            }
        }
    }
}

fn sprite(atlas_path: Option<PathBuf>, id: u32, png: Option<&Path>) -> Result<()> {
    let path = atlas_path.context("no atlas given; pass --atlas or set atlas_path")?;
    let atlas = SpriteAtlas::load(&path).with_context(|| format!("loading {path:?}"))?;
    match atlas.decode_sprite(id) {
        Ok(Some((image, hypothesis))) => {
            println!(
                "Sprite {id}: {}x{} ({} header bytes, {} bytes per pixel)",
                image.width, image.height, hypothesis.header_skip, hypothesis.bytes_per_pixel
            );
            if let Some(png) = png {
                let bytes = item_manager_lib::export::sprite_png(&image)?;
                std::fs::write(png, bytes).with_context(|| format!("writing {png:?}"))?;
                println!("Written to {}", png.display());
            }
        }
        Ok(None) => println!("Sprite {id} has no payload"),
        Err(e @ FormatError::UnsupportedSpriteFormat { .. }) => println!("{e}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Runs a worker job to completion behind a progress bar.
fn drive<T>(job: Job<T>, bars: bool, label: &'static str) -> Result<T> {
    let pb = if bars {
        ProgressBar::new(100)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:>8} [{bar:30}] {pos:>3}% {msg}")?
            .progress_chars("█▓░"),
    );
    pb.set_prefix(label);

    let result = job.wait(|event| match event {
        WorkerEvent::Progress(percent) => pb.set_position(percent as u64),
        WorkerEvent::Log(line) => pb.set_message(line),
    });
    pb.finish_and_clear();
    result
}

fn print_scan(scan: &ScanReport) {
    println!("Total sprites:     {}", scan.total_sprites);
    println!("Empty merged:      {}", scan.empties_merged);
    println!("Duplicates merged: {}", scan.duplicates_merged);
    println!("Total to optimize: {}", scan.remap.len());
}

fn optimize(
    catalog_path: Option<PathBuf>,
    atlas_path: Option<PathBuf>,
    report: Option<PathBuf>,
    options: ApplyOptions,
    bars: bool,
) -> Result<()> {
    let catalog_path = catalog_path.context("no catalog given; pass --catalog or set catalog_path")?;
    let atlas_path = atlas_path.context("no atlas given; pass --atlas or set atlas_path")?;
    let catalog = Catalog::load(&catalog_path).with_context(|| format!("loading {catalog_path:?}"))?;
    let atlas = SpriteAtlas::load(&atlas_path).with_context(|| format!("loading {atlas_path:?}"))?;

    let (atlas, scan) = match report {
        Some(path) => {
            let scan = ScanReport::load(&path).with_context(|| format!("loading scan report {path:?}"))?;
            (atlas, scan)
        }
        None => drive(worker::spawn_scan(atlas), bars, "scan")?,
    };
    print_scan(&scan);
    if scan.remap.is_empty() {
        println!("Nothing to optimize");
        return Ok(());
    }

    let outcome = drive(worker::spawn_apply(catalog, atlas, scan, options), bars, "apply")?;
    let result = outcome.result?;
    println!("Things updated:    {}", result.things_updated);
    println!("Ids rewritten:     {}", result.ids_rewritten);
    if result.ambiguous_skipped > 0 {
        println!("Skipped (id width): {}", result.ambiguous_skipped);
    }
    if options.patch_tail && !result.tail_patched {
        println!("Outfits, effects and missiles were left untouched");
    }
    if result.clean_skipped {
        println!("Sprites kept: some texture blocks may still use remapped sprites");
    } else {
        println!("Sprites cleaned:   {}", result.sprites_cleared);
    }

    let mut editor = Editor::with_parts(outcome.catalog, catalog_path, Some(outcome.atlas), Some(atlas_path));
    editor.save_catalog(None)?;
    if result.sprites_cleared > 0 {
        editor.save_atlas(None)?;
    }
    Ok(())
}
