use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use npuasm_core::{AssembleInput, BufferType, Metadata};

#[derive(Debug, Parser)]
#[command(
    name = "npuasm",
    version,
    about = "Relocatable-container assembler for AI-engine NPU control code",
    long_about = None,
    override_usage = "npuasm [COMMAND] [INPUT]",
    after_help = "Examples:\n  npuasm path/to/program.asm\n  npuasm assemble -f blob-instr-transaction txn.bin -m buffers.json -o out.npuobj\n  npuasm inspect out.npuobj\n  npuasm --help"
)]
struct Cli {
    /// Optional explicit subcommand.
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    assemble_options: AssembleOptions,

    /// Input file.
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Assemble an input buffer into a relocatable container.
    Assemble(AssembleArgs),
    /// Print a human-readable summary of a container.
    Inspect(InspectArgs),
}

#[derive(Debug, Parser)]
struct AssembleArgs {
    /// Input file: instruction stream, control packet, or assembly source.
    #[arg(value_name = "INPUT")]
    input: PathBuf,
}

#[derive(Debug, Parser)]
struct InspectArgs {
    /// Container file to summarise.
    #[arg(value_name = "CONTAINER")]
    container: PathBuf,
}

#[derive(Debug, Clone, Default, Args)]
struct AssembleOptions {
    /// Input buffer format. Required unless the input extension implies it.
    #[arg(short = 'f', long = "format", value_enum, global = true)]
    format: Option<CliBufferType>,

    /// Control-packet stream, packaged as the .ctrldata section.
    #[arg(long = "control-packet", value_name = "FILE", global = true)]
    control_packet: Option<PathBuf>,

    /// External-buffer metadata document (JSON).
    #[arg(short = 'm', long = "metadata", value_name = "FILE", global = true)]
    metadata: Option<PathBuf>,

    /// Per-PM control packet as ID=FILE; may be given repeatedly.
    #[arg(long = "pm-packet", value_name = "ID=FILE", global = true)]
    pm_packets: Vec<String>,

    /// Output container path.
    #[arg(short = 'o', long = "output", value_name = "OUTPUT", global = true)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBufferType {
    BlobInstrDpu,
    BlobInstrPrepost,
    BlobInstrTransaction,
    BlobControlPacket,
    AsmAie2,
    AsmAie2ps,
}

impl CliBufferType {
    fn buffer_type(self) -> BufferType {
        match self {
            Self::BlobInstrDpu => BufferType::BlobInstrDpu,
            Self::BlobInstrPrepost => BufferType::BlobInstrPrepost,
            Self::BlobInstrTransaction => BufferType::BlobInstrTransaction,
            Self::BlobControlPacket => BufferType::BlobControlPacket,
            Self::AsmAie2 => BufferType::AsmAie2,
            Self::AsmAie2ps => BufferType::AsmAie2ps,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let Cli {
        command,
        assemble_options,
        input,
    } = Cli::parse();

    match command {
        Some(Commands::Assemble(args)) => assemble_command(&args.input, &assemble_options),
        Some(Commands::Inspect(args)) => inspect_command(&args.container),
        None => {
            let Some(input_path) = input else {
                print_banner();
                println!();
                let mut command = Cli::command();
                command.print_help()?;
                println!();
                return Ok(());
            };
            assemble_command(&input_path, &assemble_options)
        }
    }
}

fn print_banner() {
    println!("npuasm, version {}.", env!("CARGO_PKG_VERSION"));
    println!("Assembles NPU control code into a relocatable container.");
}

fn resolve_format(
    input_path: &Path,
    explicit: Option<CliBufferType>,
) -> anyhow::Result<BufferType> {
    if let Some(format) = explicit {
        return Ok(format.buffer_type());
    }
    let ext = input_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    if ext.eq_ignore_ascii_case("asm") {
        return Ok(BufferType::AsmAie2ps);
    }
    anyhow::bail!(
        "cannot infer input format for '{}': pass --format",
        input_path.display()
    )
}

fn parse_pm_packet_arg(arg: &str) -> anyhow::Result<(u8, PathBuf)> {
    let Some((id, path)) = arg.split_once('=') else {
        anyhow::bail!("invalid --pm-packet '{arg}': expected ID=FILE");
    };
    let id: u8 = id
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid PM id '{id}' in --pm-packet"))?;
    Ok((id, PathBuf::from(path)))
}

fn default_output_path(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("out");
    let parent = input_path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}.npuobj"))
}

fn assemble_command(input_path: &Path, options: &AssembleOptions) -> anyhow::Result<()> {
    let buffer_type = resolve_format(input_path, options.format)?;
    let buffer = std::fs::read(input_path)
        .map_err(|err| anyhow::anyhow!("failed to read '{}': {err}", input_path.display()))?;

    let mut input = AssembleInput::new(buffer_type, buffer);
    if let Some(path) = &options.control_packet {
        input.control_packet = Some(std::fs::read(path)?);
    }
    if let Some(path) = &options.metadata {
        input.metadata = Some(Metadata::Document(std::fs::read(path)?));
    }
    for arg in &options.pm_packets {
        let (id, path) = parse_pm_packet_arg(arg)?;
        input.pm_packets.insert(id, std::fs::read(&path)?);
    }

    let container = npuasm_core::assemble(input)?;
    let out_path = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input_path));
    npuasm_obj::write_container(&out_path, &container)?;
    Ok(())
}

fn inspect_command(container_path: &Path) -> anyhow::Result<()> {
    let container = npuasm_obj::read_container(container_path)?;
    print!("{}", npuasm_obj::format_summary(&container));
    Ok(())
}
