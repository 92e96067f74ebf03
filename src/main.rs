//! Accelerator kernel library CLI
//!
//! Usage:
//!   accelk list --op add
//!   accelk source add_BI_SF_F
//!   accelk validate
//!   accelk run mul int:1,2,3,4 5.0
//!   accelk run rotate_left float:0,1,2,3,4 2 --json

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;

use accel_kernels::library::kernel_source;
use accel_kernels::naming::describe;
use accel_kernels::{
    Accelerator, AcceleratorConfig, DeviceBuffer, DispatchError, DispatchResult, ElementType,
    EmulatorBackend, EmulatorConfig, KernelLibrary, OpKind, Operand, Scalar,
};

#[derive(ClapParser, Debug)]
#[command(name = "accelk")]
#[command(author = "Accelerator Team")]
#[command(version = "0.1.0")]
#[command(about = "Inspects the accelerator kernel library and runs operations on the emulator")]
struct Args {
    /// JSON file with `accelerator` and `emulator` settings
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List kernel signatures in the library
    List {
        /// Only kernels of this operation (e.g. "add")
        #[arg(long = "op")]
        op: Option<String>,

        /// Output as JSON
        #[arg(short = 'j', long = "json")]
        json: bool,
    },

    /// Print generated source for a kernel name or a whole operation
    Source {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Check that the library covers every type combination
    Validate,

    /// Run one operation on the emulated accelerator
    Run {
        /// Operation mnemonic (e.g. "add", "sqrt", "rotate_left")
        #[arg(value_name = "OP")]
        op: String,

        /// Buffers as `int:1,2,3` or `float:0.5,1.5`; scalars as `5` or `5.0`
        #[arg(value_name = "OPERAND", num_args = 1..=3, required = true, allow_negative_numbers = true)]
        operands: Vec<String>,

        /// Write the result into the first operand
        #[arg(long = "in-place")]
        in_place: bool,

        /// Output as JSON
        #[arg(short = 'j', long = "json")]
        json: bool,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    accelerator: AcceleratorConfig,
    emulator: EmulatorConfig,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", "Error".red(), message);
    std::process::exit(1);
}

fn load_settings(path: Option<&str>) -> Settings {
    let Some(path) = path else {
        return Settings::default();
    };
    let text = fs::read_to_string(path)
        .unwrap_or_else(|e| fail(format!("Failed to read config '{}': {}", path, e)));
    serde_json::from_str(&text).unwrap_or_else(|e| fail(format!("Invalid config '{}': {}", path, e)))
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let settings = load_settings(args.config.as_deref());

    match args.command {
        Command::List { op, json } => list(op.as_deref(), json),
        Command::Source { name } => source(&name),
        Command::Validate => validate(args.verbose),
        Command::Run {
            op,
            operands,
            in_place,
            json,
        } => run(settings, &op, &operands, in_place, json, args.verbose),
    }
}

fn parse_op(mnemonic: &str) -> OpKind {
    OpKind::from_mnemonic(mnemonic).unwrap_or_else(|| fail(format!("Unknown operation '{}'", mnemonic)))
}

fn list(op: Option<&str>, json: bool) {
    let library = KernelLibrary::standard();
    let filter = op.map(parse_op);
    let signatures: Vec<_> = library
        .signatures()
        .iter()
        .filter(|s| filter.map_or(true, |op| s.op == op))
        .collect();

    if json {
        match serde_json::to_string_pretty(&signatures) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(format!("Failed to serialize to JSON: {}", e)),
        }
        return;
    }

    for signature in &signatures {
        println!(
            "{:<28} ({}) -> {}",
            signature.name().bold(),
            describe(&signature.operands),
            signature.result.to_string().cyan()
        );
    }
    println!();
    println!("{}: {}", "Kernels".green(), signatures.len());
}

fn source(name: &str) {
    let library = KernelLibrary::standard();
    if let Some(signature) = library.get(name) {
        print!("{}", kernel_source(signature));
    } else if let Some(op) = OpKind::from_mnemonic(name) {
        print!("{}", library.program_source(op));
    } else {
        fail(format!("No kernel or operation named '{}'", name));
    }
}

fn validate(verbose: bool) {
    let library = KernelLibrary::standard();
    match library.validate() {
        Ok(count) => {
            println!("{} {} kernels, every type combination covered", "OK".green().bold(), count);
            if verbose {
                for op in OpKind::ALL {
                    let variants = library.signatures().iter().filter(|s| s.op == op).count();
                    println!("  {:<16} {}", op.to_string().cyan(), variants);
                }
            }
        }
        Err(e) => fail(e),
    }
}

/// A parsed command-line operand, uploaded if it is a buffer
enum Value {
    Buffer(DeviceBuffer),
    Scalar(Scalar),
}

fn parse_scalar(text: &str) -> Option<Scalar> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f32>().ok().map(Scalar::Float)
    } else {
        text.parse::<i32>().ok().map(Scalar::Int)
    }
}

fn parse_value(acc: &mut Accelerator<EmulatorBackend>, text: &str) -> DispatchResult<Value> {
    let bad = || DispatchError::invalid_argument(format!("cannot parse operand '{}'", text));

    if let Some(items) = text.strip_prefix("int:") {
        let data = items
            .split(',')
            .map(|item| item.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| bad())?;
        return acc.upload(&data).map(Value::Buffer);
    }
    if let Some(items) = text.strip_prefix("float:") {
        let data = items
            .split(',')
            .map(|item| item.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| bad())?;
        return acc.upload(&data).map(Value::Buffer);
    }
    parse_scalar(text).map(Value::Scalar).ok_or_else(bad)
}

enum Outcome {
    Buffer(DeviceBuffer),
    /// The first operand was updated in place
    Receiver,
    Scalar(Scalar),
}

fn operand(values: &[Value], k: usize) -> DispatchResult<Operand<'_>> {
    match values.get(k) {
        Some(Value::Buffer(buffer)) => Ok(Operand::Buffer(buffer)),
        Some(Value::Scalar(scalar)) => Ok(Operand::Scalar(*scalar)),
        None => Err(DispatchError::invalid_argument(format!("missing operand {}", k + 1))),
    }
}

fn buffer(values: &[Value], k: usize) -> DispatchResult<&DeviceBuffer> {
    match values.get(k) {
        Some(Value::Buffer(buffer)) => Ok(buffer),
        _ => Err(DispatchError::invalid_argument(format!("operand {} must be a buffer", k + 1))),
    }
}

fn count(values: &[Value], k: usize) -> DispatchResult<usize> {
    match values.get(k) {
        Some(Value::Scalar(Scalar::Int(n))) if *n >= 0 => Ok(*n as usize),
        _ => Err(DispatchError::invalid_argument(format!(
            "operand {} must be a non-negative integer",
            k + 1
        ))),
    }
}

fn execute(
    acc: &mut Accelerator<EmulatorBackend>,
    op: OpKind,
    values: &[Value],
    in_place: bool,
) -> DispatchResult<Outcome> {
    macro_rules! binary {
        ($method:ident, $in_place:ident) => {
            if in_place {
                acc.$in_place(buffer(values, 0)?, operand(values, 1)?)?;
                Outcome::Receiver
            } else {
                Outcome::Buffer(acc.$method(operand(values, 0)?, operand(values, 1)?)?)
            }
        };
    }
    macro_rules! unary {
        ($method:ident, $in_place:ident) => {
            if in_place {
                acc.$in_place(buffer(values, 0)?)?;
                Outcome::Receiver
            } else {
                Outcome::Buffer(acc.$method(buffer(values, 0)?)?)
            }
        };
    }
    macro_rules! by_amount {
        ($method:ident, $in_place:ident, $amount:expr) => {
            if in_place {
                acc.$in_place(buffer(values, 0)?, $amount)?;
                Outcome::Receiver
            } else {
                Outcome::Buffer(acc.$method(buffer(values, 0)?, $amount)?)
            }
        };
    }

    let shift = |values: &[Value]| -> DispatchResult<u32> {
        u32::try_from(count(values, 1)?).map_err(|_| DispatchError::invalid_argument("shift amount too large"))
    };

    Ok(match op {
        OpKind::Add => binary!(add, add_in_place),
        OpKind::Sub => binary!(sub, sub_in_place),
        OpKind::Mul => binary!(mul, mul_in_place),
        OpKind::Div => binary!(div, div_in_place),
        OpKind::Min => binary!(min, min_in_place),
        OpKind::Max => binary!(max, max_in_place),
        OpKind::CompareGt => binary!(compare_gt, compare_gt_in_place),
        OpKind::BitAnd => binary!(bit_and, bit_and_in_place),
        OpKind::BitOr => binary!(bit_or, bit_or_in_place),
        OpKind::Sqrt => unary!(sqrt, sqrt_in_place),
        OpKind::Log => unary!(log, log_in_place),
        OpKind::Exp => unary!(exp, exp_in_place),
        OpKind::Sin => unary!(sin, sin_in_place),
        OpKind::Cos => unary!(cos, cos_in_place),
        OpKind::Abs => unary!(abs, abs_in_place),
        OpKind::RotateLeft => by_amount!(rotate_left, rotate_left_in_place, count(values, 1)?),
        OpKind::RotateRight => by_amount!(rotate_right, rotate_right_in_place, count(values, 1)?),
        OpKind::ShiftLeft => by_amount!(shift_left, shift_left_in_place, shift(values)?),
        OpKind::ShiftRight => by_amount!(shift_right, shift_right_in_place, shift(values)?),
        OpKind::Blend if in_place => {
            acc.blend_in_place(buffer(values, 0)?, buffer(values, 1)?, buffer(values, 2)?)?;
            Outcome::Receiver
        }
        OpKind::Blend => Outcome::Buffer(acc.blend(buffer(values, 0)?, buffer(values, 1)?, buffer(values, 2)?)?),
        OpKind::Fma if in_place => {
            acc.fma_in_place(buffer(values, 0)?, buffer(values, 1)?, buffer(values, 2)?)?;
            Outcome::Receiver
        }
        OpKind::Fma => Outcome::Buffer(acc.fma(buffer(values, 0)?, buffer(values, 1)?, buffer(values, 2)?)?),
        OpKind::MultiplyRepeat if in_place => {
            acc.multiply_repeat_in_place(buffer(values, 0)?, buffer(values, 1)?)?;
            Outcome::Receiver
        }
        OpKind::MultiplyRepeat => Outcome::Buffer(acc.multiply_repeat(buffer(values, 0)?, buffer(values, 1)?)?),
        OpKind::ToInt => Outcome::Buffer(acc.to_int(buffer(values, 0)?)?),
        OpKind::ToFloat => Outcome::Buffer(acc.to_float(buffer(values, 0)?)?),
        OpKind::Copy => Outcome::Buffer(acc.copy(buffer(values, 0)?)?),
        OpKind::RepeatFull => Outcome::Buffer(acc.repeat_full(buffer(values, 0)?, count(values, 1)?)?),
        OpKind::RepeatEach => Outcome::Buffer(acc.repeat_each(buffer(values, 0)?, count(values, 1)?)?),
        OpKind::SumReduce => Outcome::Scalar(acc.sum_reduce(buffer(values, 0)?)?),
        OpKind::MulVector => Outcome::Buffer(acc.mul_vector(buffer(values, 0)?, buffer(values, 1)?)?),
        OpKind::MulRange | OpKind::EachAreaFma | OpKind::MatrixFma => {
            return Err(DispatchError::invalid_argument(format!(
                "{} takes shape or offset parameters and is not available from the command line",
                op
            )))
        }
    })
}

/// Host copy of a buffer's contents, for printing
fn contents(acc: &mut Accelerator<EmulatorBackend>, buffer: &DeviceBuffer) -> DispatchResult<serde_json::Value> {
    Ok(match buffer.element_type() {
        ElementType::Integral => serde_json::json!(acc.to_vec::<i32>(buffer)?),
        ElementType::Floating => serde_json::json!(acc.to_vec::<f32>(buffer)?),
    })
}

fn run(settings: Settings, op: &str, operands: &[String], in_place: bool, json: bool, verbose: bool) {
    let op = parse_op(op);
    let backend = EmulatorBackend::new(settings.emulator);
    let mut acc = Accelerator::with_config(backend, settings.accelerator).unwrap_or_else(|e| fail(e));

    let values = operands
        .iter()
        .map(|text| parse_value(&mut acc, text))
        .collect::<DispatchResult<Vec<_>>>()
        .unwrap_or_else(|e| fail(e));

    let outcome = execute(&mut acc, op, &values, in_place).unwrap_or_else(|e| fail(e));
    let (element_type, result) = match &outcome {
        Outcome::Buffer(buffer) => (buffer.element_type(), contents(&mut acc, buffer)),
        Outcome::Receiver => match buffer(&values, 0) {
            Ok(receiver) => (receiver.element_type(), contents(&mut acc, receiver)),
            Err(e) => fail(e),
        },
        Outcome::Scalar(Scalar::Int(v)) => (ElementType::Integral, Ok(serde_json::json!(v))),
        Outcome::Scalar(Scalar::Float(v)) => (ElementType::Floating, Ok(serde_json::json!(v))),
    };
    let result = result.unwrap_or_else(|e| fail(e));

    if json {
        let report = serde_json::json!({
            "operation": op,
            "in_place": in_place,
            "element_type": element_type,
            "result": result,
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(format!("Failed to serialize to JSON: {}", e)),
        }
    } else {
        println!("{}: {}", "Operation".cyan(), op);
        println!("{}: {}", "Element type".cyan(), element_type);
        match outcome {
            Outcome::Scalar(scalar) => println!("{}: {}", "Result".green().bold(), scalar),
            _ => println!("{}: {}", "Result".green().bold(), result),
        }
    }

    if verbose {
        let stats = acc.backend().stats();
        println!();
        println!("{}", "Emulator".bold().yellow());
        println!("  {}: {}", "compiles".cyan(), stats.compiles);
        println!("  {}: {}", "kernels".cyan(), stats.kernels_created);
        println!("  {}: {}", "enqueues".cyan(), stats.enqueues);
        println!("  {}: {}", "allocations".cyan(), stats.allocations);
    }
}
