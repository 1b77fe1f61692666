//! certel-keygen: generate an RSA keypair for submitting certifications.
//!
//! Writes `private.pem` (PKCS#8) and `public.pem` (SubjectPublicKeyInfo) to
//! the output directory and prints the public-key fingerprint clients can use
//! to cross-check their enrollment.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use certel_crypto::{fingerprint, Keypair};

#[derive(Parser, Debug)]
#[command(name = "certel-keygen", version, about = "Generate a Certel RSA keypair")]
struct Args {
    /// Directory the PEM files are written to.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// RSA modulus size in bits.
    #[arg(long, default_value_t = 2048)]
    bits: usize,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let keypair = match Keypair::generate(args.bits) {
        Ok(kp) => kp,
        Err(e) => {
            eprintln!("key generation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&args.out) {
        eprintln!("creating {}: {e}", args.out.display());
        return ExitCode::FAILURE;
    }
    let private_path = args.out.join("private.pem");
    let public_path = args.out.join("public.pem");

    if let Err(e) = std::fs::write(&private_path, &keypair.private_pem) {
        eprintln!("writing {}: {e}", private_path.display());
        return ExitCode::FAILURE;
    }
    if let Err(e) = std::fs::write(&public_path, &keypair.public_pem) {
        eprintln!("writing {}: {e}", public_path.display());
        return ExitCode::FAILURE;
    }

    match fingerprint(&keypair.public_pem) {
        Ok(fp) => println!("wrote {} and {}\nfingerprint: {fp}",
            private_path.display(), public_path.display()),
        Err(e) => {
            eprintln!("fingerprinting generated key failed: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
