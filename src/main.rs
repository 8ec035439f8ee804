mod bmp;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use pep::{compress, decompress, load, save, serialize, PepFormat};

#[derive(Parser)]
#[command(name = "pep", about = "PEP (Prediction-Encoded Pixels) codec and converter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Auto mode: `.pep` input converts to BMP, anything else converts to PEP.
    #[arg(value_name = "IN", conflicts_with = "command")]
    input: Option<PathBuf>,
    #[arg(value_name = "OUT", conflicts_with = "command")]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the 32x32 demo gradient and compress+save it.
    Demo { out: PathBuf },
    /// Convert a raw RGBA8 buffer to .pep.
    Rgba {
        width: u16,
        height: u16,
        input: PathBuf,
        out: PathBuf,
    },
    /// Convert an image (PNG/TIFF/BMP/...) to .pep.
    Image { input: PathBuf, out: PathBuf },
    /// Compress an image to memory only; report size, write nothing.
    DryRun { input: PathBuf },
    /// Decompress a .pep file into a 32-bit BMP.
    ToBmp { input: PathBuf, out: PathBuf },
    /// Decompress a .pep file into an 8-bit RLE8 BMP.
    ToRleBmp { input: PathBuf, out: PathBuf },
}

fn has_ext_ci(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn derive_out_path(in_path: &Path, new_ext: &str) -> PathBuf {
    in_path.with_extension(new_ext)
}

fn make_demo_pixels() -> Vec<u32> {
    let (w, h) = (32u32, 32u32);
    let mut pixels = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let r = (x * 8) as u8;
            let g = (y * 8) as u8;
            let b: u8 = if ((x >> 3) ^ (y >> 3)) & 1 != 0 { 32 } else { 200 };
            pixels.push(u32::from_be_bytes([r, g, b, 255]));
        }
    }
    pixels
}

fn read_rgba_file(path: &Path, width: u16, height: u16) -> anyhow::Result<Vec<u32>> {
    let expected = width as usize * height as usize * 4;
    let raw = std::fs::read(path).with_context(|| format!("cannot open {}", path.display()))?;
    if raw.len() != expected {
        bail!("input size mismatch: got {}, expected {expected}", raw.len());
    }
    Ok(raw
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_image_file(path: &Path) -> anyhow::Result<(Vec<u32>, u16, u16)> {
    let img = image::open(path).with_context(|| format!("cannot decode {}", path.display()))?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    if w == 0 || h == 0 {
        bail!("invalid image size");
    }
    let width: u16 = w.try_into().context("image width exceeds u16")?;
    let height: u16 = h.try_into().context("image height exceeds u16")?;
    let pixels = rgba
        .pixels()
        .map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
        .collect();
    Ok((pixels, width, height))
}

fn run_demo(out: &Path) -> anyhow::Result<()> {
    let pixels = make_demo_pixels();
    let image = compress(&pixels, 32, 32, PepFormat::Rgba, PepFormat::Rgba)
        .context("compression failed")?;
    save(&image, out).with_context(|| format!("failed to save {}", out.display()))?;
    log::info!("wrote {} (32x32)", out.display());
    Ok(())
}

fn run_rgba(width: u16, height: u16, input: &Path, out: &Path) -> anyhow::Result<()> {
    let pixels = read_rgba_file(input, width, height)?;
    let image = compress(&pixels, width, height, PepFormat::Rgba, PepFormat::Rgba)
        .context("compression failed")?;
    save(&image, out).with_context(|| format!("failed to save {}", out.display()))?;
    log::info!("wrote {} ({width}x{height})", out.display());
    Ok(())
}

fn run_image(input: &Path, out: &Path) -> anyhow::Result<()> {
    let (pixels, width, height) = decode_image_file(input)?;
    let image = compress(&pixels, width, height, PepFormat::Rgba, PepFormat::Rgba)
        .context("compression failed")?;
    save(&image, out).with_context(|| format!("failed to save {}", out.display()))?;
    log::info!("wrote {} ({width}x{height})", out.display());
    Ok(())
}

fn run_dry_run(input: &Path) -> anyhow::Result<()> {
    let (pixels, width, height) = decode_image_file(input)?;
    let image = compress(&pixels, width, height, PepFormat::Rgba, PepFormat::Rgba)
        .context("compression failed")?;
    let bytes = serialize(&image).context("serialization failed")?;
    log::info!("dry run: {width}x{height} -> {} bytes", bytes.len());
    Ok(())
}

fn run_to_bmp(input: &Path, out: &Path) -> anyhow::Result<()> {
    let image = load(input).with_context(|| format!("failed to load {}", input.display()))?;
    let pixels = decompress(&image, PepFormat::Rgba, false)
        .context("decompress failed")?;
    let bytes = bmp::write_bmp32(&pixels, image.width as u32, image.height as u32);
    std::fs::write(out, bytes).with_context(|| format!("cannot write {}", out.display()))?;
    log::info!("wrote {} ({}x{} 32bpp BGRA)", out.display(), image.width, image.height);
    Ok(())
}

fn run_to_rle_bmp(input: &Path, out: &Path) -> anyhow::Result<()> {
    let image = load(input).with_context(|| format!("failed to load {}", input.display()))?;
    if image.palette.len() > 255 {
        bail!("palette too large for 8-bit BMP");
    }
    // Decompress in the image's own stored format so pixels match palette entries.
    let pixels = decompress(&image, image.format, false).context("decompress failed")?;
    let bytes = bmp::write_rle8_bmp(&pixels, &image.palette, image.format, image.width as u32, image.height as u32);
    std::fs::write(out, bytes).with_context(|| format!("cannot write {}", out.display()))?;
    log::info!("wrote {} ({}x{} 8bpp RLE)", out.display(), image.width, image.height);
    Ok(())
}

fn run_auto(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    if has_ext_ci(input, "pep") {
        let derived;
        let out = match output {
            Some(o) => o,
            None => {
                derived = derive_out_path(input, "bmp");
                &derived
            }
        };
        run_to_bmp(input, out)
    } else {
        let derived;
        let out = match output {
            Some(o) => o,
            None => {
                derived = derive_out_path(input, "pep");
                &derived
            }
        };
        run_image(input, out)
    }
}

/// Walks an error's cause chain looking for a typed I/O failure — either a
/// bare `std::io::Error` (from `std::fs::read`/`write`) or a `PepError::Io`
/// (from `save`/`load`) — as opposed to a codec failure (bad input, a
/// malformed container, compression/decompression rejecting the data).
fn is_io_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<std::io::Error>().is_some()
            || matches!(cause.downcast_ref::<pep::PepError>(), Some(pep::PepError::Io(_)))
    })
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Command::Demo { out }) => run_demo(&out),
        Some(Command::Rgba { width, height, input, out }) => run_rgba(width, height, &input, &out),
        Some(Command::Image { input, out }) => run_image(&input, &out),
        Some(Command::DryRun { input }) => run_dry_run(&input),
        Some(Command::ToBmp { input, out }) => run_to_bmp(&input, &out),
        Some(Command::ToRleBmp { input, out }) => run_to_rle_bmp(&input, &out),
        None => match cli.input {
            Some(input) => run_auto(&input, cli.output.as_deref()),
            None => {
                eprintln!("no input given; run with --help for usage");
                return ExitCode::from(1);
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if is_io_failure(&e) {
                ExitCode::from(3)
            } else {
                ExitCode::from(2)
            }
        }
    }
}
