use clap::{Parser, Subcommand};
use chowpack::batch::{run_batch, BatchReport, Categorize};
use chowpack::bitmap::{self, BitmapError, BitmapHeader, SizePolicy, HEADER_SIZE};
use chowpack::container::ContainerReader;
use chowpack::optimize::{self, OptimizeOptions};
use chowpack::repack::{check_contiguity, RepackError, RepackOptions, RepackSummary, Repacker, SubstitutionSet};
use chowpack::validate::{self, scanner};
use chowpack::{logging, AssetId, AssetKind, Config};
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "chowpack", version, about = "Chowdren Assets.dat extractor, bitmap codec and repacker")]
struct Cli {
    /// JSON file overriding the table layout and codec settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show table statistics and consistency of an archive
    Info {
        archive: PathBuf,
    },
    /// Extract assets to <dir>/<kind>s/<kind>_<index>.<ext>
    Extract {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// image, sound, font or shader
        #[arg(short, long)]
        kind: Option<String>,
        /// Single asset index (requires --kind)
        #[arg(short, long, requires = "kind")]
        index: Option<u32>,
    },
    /// Decode one bitmap (or a directory of them) to PNG
    Decode {
        input:  PathBuf,
        output: Option<PathBuf>,
        /// Repair payloads whose length does not match the header
        #[arg(long)]
        lenient: bool,
    },
    /// Encode a PNG as a bitmap record
    Encode {
        png:    PathBuf,
        output: PathBuf,
        /// Original .bin whose header is used as the template
        #[arg(long)]
        original: Option<PathBuf>,
        /// Resize to WxH before encoding
        #[arg(long, value_parser = parse_size)]
        size: Option<(u16, u16)>,
        /// Shrink to fit the 65535-byte payload limit if needed
        #[arg(long)]
        fit: bool,
    },
    /// Dump a bitmap header
    Inspect {
        file: PathBuf,
    },
    /// Validate a bitmap, a directory of bitmaps, or an archive's image table
    Validate {
        path: PathBuf,
        /// Treat <path> as an archive and scan its image table
        #[arg(long)]
        archive: bool,
        #[arg(long)]
        json: bool,
    },
    /// Downscale every image_*.bin in a directory
    Optimize {
        input:  PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "0.5")]
        scale: f32,
        #[arg(long, default_value = "16")]
        min_dimension: u16,
    },
    /// Rebuild an archive with the assets found in <modified_dir>
    Repack {
        original:     PathBuf,
        modified_dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Skip validating image substitutes
        #[arg(long)]
        no_validate: bool,
        /// Re-read the output and compare it with its inputs
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(logging::level_from_flags(cli.verbose, cli.quiet))?;
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None       => Config::default(),
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { archive } => {
            let reader = open_archive(&archive, &config)?;
            let metadata_size = config.layout.metadata_size();

            println!("── Assets.dat ───────────────────────────────────────────");
            println!("  Path           {}", archive.display());
            println!("  Size           {} B", reader.len());
            println!("  Table region   {} B", metadata_size);
            println!("{:<8} {:>8} {:>10} {:>10} {:>10} {:>12}",
                     "Kind", "Count", "Smallest", "Largest", "Mean", "Total");
            for table in reader.tables.iter() {
                let s = table.stats();
                println!("{:<8} {:>8} {:>10} {:>10} {:>10} {:>12}",
                    table.kind().dir_name(), s.count, s.smallest, s.largest, s.mean(), s.total);
            }

            let bad = reader.out_of_range();
            println!("  Out of range   {}", bad.len());
            for (id, record) in bad.iter().take(10) {
                println!("    {id}: {}..{}", record.offset, record.end());
            }
            match check_contiguity(&reader.tables, metadata_size) {
                Ok(end)  => println!("  Contiguous     yes (payloads end at {end})"),
                Err(e)   => println!("  Contiguous     no ({e})"),
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, output_dir, kind, index } => {
            let mut reader = open_archive(&archive, &config)?;
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            match (kind, index) {
                (Some(kind), Some(index)) => {
                    let asset = reader.extract_to(AssetId::new(kind, index), &output_dir)?;
                    println!("{} → {} ({} B, {})",
                        asset.id, asset.path.display(), asset.size, asset.format.describe());
                }
                (Some(kind), None) => print_report(&reader.extract_kind(kind, &output_dir)),
                _ => print_report(&reader.extract_all(&output_dir)),
            }
        }

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode { input, output, lenient } => {
            let policy = if lenient { SizePolicy::Lenient } else { SizePolicy::Strict };
            if input.is_dir() {
                let out_dir = output.unwrap_or_else(|| input.join("png"));
                std::fs::create_dir_all(&out_dir)?;
                let items = scanner::list_bitmaps(&input)?
                    .into_iter()
                    .map(|p| (p.display().to_string(), p))
                    .collect();
                let report = run_batch(items, |path: PathBuf| {
                    let dest = out_dir.join(path.with_extension("png").file_name().unwrap_or_default());
                    decode_to_png(&path, &dest, &config, policy)
                });
                print_report(&report);
            } else {
                let dest = output.unwrap_or_else(|| input.with_extension("png"));
                let suspect = decode_to_png(&input, &dest, &config, policy)?;
                println!("Decoded → {}{}", dest.display(), if suspect { " (suspect)" } else { "" });
            }
        }

        // ── Encode ───────────────────────────────────────────────────────────
        Commands::Encode { png, output, original, size, fit } => {
            let mut image = image::open(&png)?.to_rgba8();
            if let Some((w, h)) = size {
                image = optimize::resize_rgba(&image, w, h);
            }
            if fit {
                let (w, h) = (clamp_u16(image.width()), clamp_u16(image.height()));
                let (fw, fh) = optimize::fit_dimensions(w, h);
                if (fw, fh) != (w, h) {
                    println!("  fit {w}x{h} → {fw}x{fh}");
                    image = optimize::resize_rgba(&image, fw, fh);
                }
            }
            let template = match &original {
                Some(path) => {
                    let bytes = std::fs::read(path)?;
                    Some(BitmapHeader::from_bytes(&bytes).ok_or(BitmapError::TooShort { len: bytes.len() })?)
                }
                None => None,
            };
            let encoded = bitmap::encode_image(&image, template.as_ref(), &config.bitmap)?;
            std::fs::write(&output, &encoded)?;
            println!("Encoded {}x{} → {} ({} B)",
                image.width(), image.height(), output.display(), encoded.len());
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { file } => {
            let bytes = std::fs::read(&file)?;
            let header = BitmapHeader::from_bytes(&bytes)
                .ok_or(BitmapError::TooShort { len: bytes.len() })?;
            let report = validate::validate(&bytes, &config.bitmap);

            println!("── Bitmap header ────────────────────────────────────────");
            for (row, chunk) in header.as_bytes().chunks(16).enumerate() {
                println!("  {:04x}  {}", row * 16, hex::encode(chunk));
            }
            let (hx, hy) = header.hotspot();
            println!("  Width          {:?}", header.width_copies());
            println!("  Height         {:?}", header.height_copies());
            println!("  Hotspot        ({hx}, {hy})");
            println!("  Flags          {:#06x}", header.flags());
            println!("  Opaque 20..46  {}", hex::encode(header.opaque_region()));
            println!("  Declared size  {} B (expected {})", header.decompressed_size(), header.expected_pixel_bytes());
            println!("  Reserved       {}", hex::encode(header.reserved()));
            println!("  Record size    {} B ({} after the header)", bytes.len(), bytes.len().saturating_sub(HEADER_SIZE));
            match report.marker_offset {
                Some(offset) => println!("  zlib marker    byte {offset}"),
                None         => println!("  zlib marker    none in first {} bytes", config.bitmap.marker_window),
            }
            println!("  Validation     {}", report.outcome);
        }

        // ── Validate ─────────────────────────────────────────────────────────
        Commands::Validate { path, archive, json } => {
            if !archive && path.is_file() {
                let report = scanner::validate_file(&path, &config.bitmap)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("{}: {}", path.display(), report.outcome);
                }
                return Ok(());
            }

            let report = if archive {
                let mut reader = open_archive(&path, &config)?;
                scanner::scan_archive(&mut reader, &config.bitmap)
            } else {
                scanner::scan_dir(&path, &config.bitmap)?
            };
            if json {
                println!("{}", String::from_utf8_lossy(&report.to_json()?));
            } else {
                for (name, r) in report.invalid() {
                    println!("  {name}: {}", r.outcome);
                }
                for (name, e) in report.results.failures() {
                    println!("  {name}: {e}");
                }
                for (category, count) in report.category_counts() {
                    println!("  {category:<24} {count}");
                }
                println!("{}", report.summary());
            }
        }

        // ── Optimize ─────────────────────────────────────────────────────────
        Commands::Optimize { input, output, scale, min_dimension } => {
            let options = OptimizeOptions { scale, min_dimension };
            let report = optimize::optimize_dir(&input, &output, &options, &config.bitmap)?;
            let resized: Vec<_> = report.successes().filter(|(_, f)| f.skipped.is_none()).collect();
            let before: u64 = resized.iter().map(|(_, f)| f.pixels_before()).sum();
            let after:  u64 = resized.iter().map(|(_, f)| f.pixels_after()).sum();
            println!("  resized        {}", resized.len());
            println!("  skipped        {}", report.succeeded() - resized.len());
            if before > 0 {
                println!("  pixels         {before} → {after} (-{:.0}%)",
                    (1.0 - after as f64 / before as f64) * 100.0);
            }
            print_report(&report);
        }

        // ── Repack ───────────────────────────────────────────────────────────
        Commands::Repack { original, modified_dir, output, no_validate, verify } => {
            let substitutes = SubstitutionSet::from_dir(&modified_dir, &config.layout)?;
            println!("  substitutes    {}", substitutes.len());

            let repacker = Repacker::from_config(&config)
                .with_options(RepackOptions { validate_images: !no_validate });
            let partial = partial_path(&output);
            let summary = match repack_to(&repacker, &original, &substitutes, &partial) {
                Ok(summary) => summary,
                Err(e) => {
                    let _ = std::fs::remove_file(&partial);
                    return Err(e.into());
                }
            };
            std::fs::rename(&partial, &output)?;

            for (kind, counts) in &summary.kinds {
                println!("  {:<14} {} substituted, {} copied", kind.dir_name(), counts.substituted, counts.copied);
            }
            println!("  size           {} B", summary.final_size);

            if verify {
                let end = repacker.verify(
                    BufReader::new(File::open(&original)?),
                    BufReader::new(File::open(&output)?),
                    &substitutes,
                )?;
                println!("  verified       payloads contiguous up to {end}");
            }
            println!("Repacked → {}", output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_archive(path: &Path, config: &Config) -> Result<ContainerReader<BufReader<File>>, Box<dyn std::error::Error>> {
    let file = BufReader::new(File::open(path)?);
    Ok(ContainerReader::open(file, config.layout.clone())?)
}

fn parse_kind(s: &str) -> Result<AssetKind, String> {
    AssetKind::from_name(s).ok_or_else(|| format!("Unknown asset kind '{s}' (image, sound, font, shader)"))
}

fn parse_size(s: &str) -> Result<(u16, u16), String> {
    let (w, h) = s.split_once(['x', 'X']).ok_or_else(|| format!("Expected WxH, got '{s}'"))?;
    let w = w.parse::<u16>().map_err(|e| format!("Bad width '{w}': {e}"))?;
    let h = h.parse::<u16>().map_err(|e| format!("Bad height '{h}': {e}"))?;
    if w == 0 || h == 0 {
        return Err("Dimensions must be non-zero".into());
    }
    Ok((w, h))
}

fn clamp_u16(v: u32) -> u16 {
    v.min(u16::MAX as u32) as u16
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Repack into `partial`, syncing it to disk before returning.
fn repack_to(
    repacker:    &Repacker,
    original:    &Path,
    substitutes: &SubstitutionSet,
    partial:     &Path,
) -> Result<RepackSummary, RepackError> {
    let src = BufReader::new(File::open(original)?);
    let mut out = BufWriter::new(File::create(partial)?);
    let summary = repacker.repack(src, substitutes, &mut out)?;
    out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(summary)
}

#[derive(Error, Debug)]
enum DecodeFileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Bitmap(#[from] BitmapError),
    #[error("PNG error: {0}")]
    Png(#[from] image::ImageError),
}

impl Categorize for DecodeFileError {
    fn category(&self) -> &'static str {
        match self {
            DecodeFileError::Io(_)     => "io",
            DecodeFileError::Bitmap(e) => e.category(),
            DecodeFileError::Png(_)    => "png",
        }
    }
}

/// Returns whether the decode had to repair the payload.
fn decode_to_png(
    input:  &Path,
    output: &Path,
    config: &Config,
    policy: SizePolicy,
) -> Result<bool, DecodeFileError> {
    let bytes = std::fs::read(input)?;
    let decoded = bitmap::decode_with(&bytes, &config.bitmap, policy)?;
    let suspect = decoded.suspect;
    let (width, height) = (decoded.width, decoded.height);
    let actual = decoded.pixels.len();
    let image = decoded.into_image().ok_or(BitmapError::BufferLength {
        width,
        height,
        expected: width as usize * height as usize * bitmap::BYTES_PER_PIXEL,
        actual,
    })?;
    image.save(output)?;
    Ok(suspect)
}

fn print_report<T, E: Display + Categorize>(report: &BatchReport<T, E>) {
    for (name, err) in report.failures() {
        println!("  ✗ {name}: {err}");
    }
    for (category, count) in report.failure_counts() {
        println!("  {category:<24} {count}");
    }
    println!("{}", report.summary());
}
