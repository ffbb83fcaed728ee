use std::path::PathBuf;
use std::process;

use clap::Parser;

use shard_rs::common::reset_sigpipe;
use shard_rs::group;

#[derive(Parser)]
#[command(
    name = "fgroup",
    version,
    about = "Split a key-sorted CSV file into one file per run of equal leading keys"
)]
struct Cli {
    /// Source CSV file (first field is the numeric key)
    input: PathBuf,

    /// Destination directory (created if absent)
    dest: PathBuf,

    /// Report line and group counts when done
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() {
    reset_sigpipe();

    let cli = Cli::parse();
    match group::group_file(&cli.input, &cli.dest) {
        Ok(summary) => {
            if cli.verbose {
                eprintln!("{} lines into {} groups", summary.lines, summary.groups);
            }
        }
        Err(e) => {
            eprintln!("fgroup: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::process::Command;

    fn cmd() -> Command {
        let mut path = std::env::current_exe().unwrap();
        path.pop();
        path.pop();
        path.push("fgroup");
        Command::new(path)
    }

    #[test]
    fn test_group_by_key_runs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, "1,a\n1,b\n2,c\n3,d\n3,e\n").unwrap();
        let out = dir.path().join("out");

        let output = cmd()
            .args([input.to_str().unwrap(), out.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert_eq!(
            fs::read_to_string(out.join("group-000001.csv")).unwrap(),
            "1,a\n1,b\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("group-000002.csv")).unwrap(),
            "2,c\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("group-000003.csv")).unwrap(),
            "3,d\n3,e\n"
        );
    }

    #[test]
    fn test_group_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, "1,a\nno-comma-here\n").unwrap();
        let out = dir.path().join("out");

        let output = cmd()
            .args([input.to_str().unwrap(), out.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("line 2"), "stderr: {}", stderr);
    }

    #[test]
    fn test_group_nonexistent_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let output = cmd()
            .args(["/nonexistent_fgroup_input", out.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(!output.status.success());
    }
}
