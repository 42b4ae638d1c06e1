/*!
# xmlwf

Checks XML documents for well-formedness. Each file (or the standard input
when no files are given) is parsed on its own; the first error of a document
is reported as `file:line:column: message` on the standard output.

The exit status is 2 if any document is not well-formed or cannot be read.
*/
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context as _};
use clap::Parser as _;

use xmlpush::{
	Context, Error, ExternalEntity, Handler, ParamEntityParsing, Parser, ParserOptions,
	PullParser,
};

/// Separator between namespace URI and local name in expanded names.
const NSSEP: char = '\u{1}';

#[derive(clap::Parser, Debug, Default)]
#[command(name = "xmlwf", version, about = "Check XML documents for well-formedness")]
struct Cli {
	/// Reject documents which are not standalone
	#[arg(short = 's')]
	require_standalone: bool,

	/// Enable namespace processing
	#[arg(short = 'n')]
	namespaces: bool,

	/// Process parameter entities and the external DTD subset (implies -x)
	#[arg(short = 'p')]
	param_entities: bool,

	/// Load external entities from files relative to the document
	#[arg(short = 'x')]
	external_entities: bool,

	/// Override the document encoding
	#[arg(short = 'e', value_name = "encoding")]
	encoding: Option<String>,

	/// Print the time spent parsing each document on the standard error
	#[arg(short = 't')]
	timing: bool,

	/// Documents to check; the standard input if none are given
	files: Vec<PathBuf>,
}

impl Cli {
	fn load_external(&self) -> bool {
		self.external_entities || self.param_entities
	}
}

/// Resolve a system identifier against the location of the referencing
/// entity.
fn resolve(base: Option<&str>, system_id: &str) -> PathBuf {
	let sys = Path::new(system_id);
	if sys.is_absolute() {
		return sys.to_path_buf();
	}
	match base.and_then(|b| Path::new(b).parent()) {
		Some(dir) => dir.join(sys),
		None => sys.to_path_buf(),
	}
}

fn report(name: &str, line: u64, column: u64, e: &Error) {
	println!("{}:{}:{}: {}", name, line, column, e);
}

struct Checker {
	require_standalone: bool,
	load_external: bool,
}

impl Handler for Checker {
	fn not_standalone(&mut self, _cx: &mut Context) -> bool {
		!self.require_standalone
	}

	fn external_entity_ref(&mut self, cx: &mut Context, entity: &ExternalEntity) -> xmlpush::Result<()> {
		if !self.load_external {
			return Ok(());
		}
		let system_id = match entity.system_id.as_deref() {
			Some(s) => s,
			None => return Ok(()),
		};
		let path = resolve(entity.base.as_deref(), system_id);
		let name = path.display().to_string();
		let mut reader = match File::open(&path) {
			Ok(f) => BufReader::new(f),
			Err(e) => {
				eprintln!("{}: {}", name, e);
				return Err(e.into());
			}
		};
		let mut sub = cx.external_entity_parser(None)?;
		sub.set_base(path.to_str());
		loop {
			let buf = reader.fill_buf()?;
			let n = buf.len();
			if let Err(e) = sub.feed(self, buf, n == 0) {
				report(&name, sub.current_line_number(), sub.current_column_number(), &e);
				return Err(e);
			}
			if n == 0 {
				return Ok(());
			}
			reader.consume(n);
		}
	}
}

/// Parse one document; returns whether it is well-formed.
fn check<R: BufRead>(cli: &Cli, name: &str, base: Option<&Path>, input: R) -> anyhow::Result<bool> {
	let mut opts = ParserOptions::new();
	if let Some(enc) = cli.encoding.as_deref() {
		opts = opts.encoding(enc);
	}
	if cli.namespaces {
		opts = opts.namespaces(NSSEP);
	}
	let checker = Checker {
		require_standalone: cli.require_standalone,
		load_external: cli.load_external(),
	};
	let mut parser = Parser::with_options(checker, opts);
	if cli.param_entities {
		parser.set_param_entity_parsing(ParamEntityParsing::Always)?;
	}
	parser.set_base(base.and_then(|b| b.to_str()));

	let started = Instant::now();
	let mut driver = PullParser::new(input, parser);
	let result = driver.run();
	if cli.timing {
		eprintln!("{}: {:?}", name, started.elapsed());
	}
	match result {
		Ok(_) => Ok(true),
		Err(Error::IO(e)) => bail!("{}: {}", name, e),
		Err(e) => {
			let p = driver.get_parser();
			report(name, p.current_line_number(), p.current_column_number(), &e);
			Ok(false)
		}
	}
}

fn check_file(cli: &Cli, path: &Path) -> anyhow::Result<bool> {
	let name = path.display().to_string();
	let file = File::open(path).with_context(|| name.clone())?;
	check(cli, &name, Some(path), BufReader::new(file))
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	let mut failed = false;

	let results: Vec<anyhow::Result<bool>> = if cli.files.is_empty() {
		let stdin = io::stdin();
		let lock = stdin.lock();
		vec![check(&cli, "STDIN", None, lock)]
	} else {
		cli.files.iter().map(|path| check_file(&cli, path)).collect()
	};
	for result in results {
		match result {
			Ok(true) => (),
			Ok(false) => failed = true,
			Err(e) => {
				eprintln!("xmlwf: {:#}", e);
				failed = true;
			}
		}
	}

	if failed {
		ExitCode::from(2)
	} else {
		ExitCode::SUCCESS
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn system_ids_are_relative_to_the_referencing_entity() {
		assert_eq!(
			resolve(Some("docs/main.xml"), "dtd/doc.dtd"),
			PathBuf::from("docs/dtd/doc.dtd")
		);
		assert_eq!(resolve(None, "doc.dtd"), PathBuf::from("doc.dtd"));
		assert_eq!(resolve(Some("docs/main.xml"), "/abs/doc.dtd"), PathBuf::from("/abs/doc.dtd"));
	}

	#[test]
	fn well_formed_documents_pass() {
		let cli = Cli::default();
		assert!(check(&cli, "doc", None, &b"<doc><a/>text</doc>"[..]).unwrap());
	}

	#[test]
	fn errors_are_reported_not_raised() {
		let cli = Cli::default();
		assert!(!check(&cli, "doc", None, &b"<doc></a>"[..]).unwrap());
	}

	#[test]
	fn standalone_can_be_required() {
		let doc = &b"<!DOCTYPE doc SYSTEM 'doc.dtd'><doc/>"[..];
		assert!(check(&Cli::default(), "doc", None, doc).unwrap());
		let cli = Cli {
			require_standalone: true,
			..Cli::default()
		};
		assert!(!check(&cli, "doc", None, doc).unwrap());
	}

	#[test]
	fn namespaces_are_checked_with_n() {
		let doc = &b"<p:doc/>"[..];
		assert!(check(&Cli::default(), "doc", None, doc).unwrap());
		let cli = Cli {
			namespaces: true,
			..Cli::default()
		};
		assert!(!check(&cli, "doc", None, doc).unwrap());
	}

	#[test]
	fn missing_external_entities_fail_with_x() {
		let doc = &b"<!DOCTYPE doc [<!ENTITY e SYSTEM 'does-not-exist.xml'>]><doc>&e;</doc>"[..];
		assert!(check(&Cli::default(), "doc", None, doc).unwrap());
		let cli = Cli {
			external_entities: true,
			..Cli::default()
		};
		assert!(!check(&cli, "doc", None, doc).unwrap());
	}

	#[test]
	fn timing_does_not_change_the_verdict() {
		let cli = Cli {
			timing: true,
			..Cli::default()
		};
		assert!(check(&cli, "doc", None, &b"<doc/>"[..]).unwrap());
		assert!(!check(&cli, "doc", None, &b"<doc>"[..]).unwrap());
	}

	#[test]
	fn cli_flags() {
		let cli = Cli::try_parse_from(["xmlwf", "-s", "-n", "-p", "-t", "-e", "ISO-8859-1", "a.xml", "b.xml"]).unwrap();
		assert!(cli.require_standalone);
		assert!(cli.namespaces);
		assert!(cli.load_external());
		assert!(cli.timing);
		assert_eq!(cli.encoding.as_deref(), Some("ISO-8859-1"));
		assert_eq!(cli.files.len(), 2);
	}
}
