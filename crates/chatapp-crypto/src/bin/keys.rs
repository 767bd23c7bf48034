//! chatapp-keys: Command-line tool for chatapp identity and group key operations.
//!
//! Creates password-wrapped identities, mints group keys and encrypts or
//! decrypts message and file payloads the same way the chat client does.

use clap::{Parser, Subcommand};
use chatapp_crypto::{
    create_identity_with_iterations, decrypt_file, decrypt_text, encrypt_file, encrypt_text,
    GroupKey, WrappedIdentity, DEFAULT_PBKDF2_ITERATIONS,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatapp-keys")]
#[command(author, version, about = "End-to-end encryption keys for chatapp")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an identity keypair wrapped under a password
    IdentityCreate {
        /// Password protecting the private key
        #[arg(short, long)]
        password: String,

        /// PBKDF2 iteration count
        #[arg(long, default_value_t = DEFAULT_PBKDF2_ITERATIONS)]
        iterations: u32,

        /// Write the wrapped identity JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that a password unlocks a wrapped identity
    IdentityRecover {
        /// Password protecting the private key
        #[arg(short, long)]
        password: String,

        /// Wrapped identity JSON file (from identity-create)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print a fresh random group key (base64)
    GroupKey,

    /// Encrypt a text message under a group key
    EncryptText {
        /// Group key (base64)
        #[arg(short, long)]
        key: String,

        /// Message text
        #[arg(short, long)]
        text: String,
    },

    /// Decrypt a text message blob
    DecryptText {
        /// Group key (base64)
        #[arg(short, long)]
        key: String,

        /// Encrypted message blob (base64)
        #[arg(short, long)]
        blob: String,
    },

    /// Encrypt a file attachment under a group key
    EncryptFile {
        /// Group key (base64)
        #[arg(short, long)]
        key: String,

        /// Input file to encrypt
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for encrypted data
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Decrypt a file attachment
    DecryptFile {
        /// Group key (base64)
        #[arg(short, long)]
        key: String,

        /// Input file to decrypt
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for decrypted data
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::IdentityCreate {
            password,
            iterations,
            output,
        } => {
            cmd_identity_create(&password, iterations, output.as_deref())?;
        }
        Commands::IdentityRecover { password, input } => {
            cmd_identity_recover(&password, &input)?;
        }
        Commands::GroupKey => {
            cmd_group_key()?;
        }
        Commands::EncryptText { key, text } => {
            let key = GroupKey::from_base64(&key)?;
            let output = serde_json::json!({ "blob": encrypt_text(&key, &text)? });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::DecryptText { key, blob } => {
            let key = GroupKey::from_base64(&key)?;
            let output = serde_json::json!({ "text": decrypt_text(&key, &blob)? });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::EncryptFile { key, input, output } => {
            let key = GroupKey::from_base64(&key)?;
            cmd_transform_file(&input, &output, |data| encrypt_file(&key, data))?;
        }
        Commands::DecryptFile { key, input, output } => {
            let key = GroupKey::from_base64(&key)?;
            cmd_transform_file(&input, &output, |data| decrypt_file(&key, data))?;
        }
    }

    Ok(())
}

fn cmd_identity_create(
    password: &str,
    iterations: u32,
    output_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if password.is_empty() {
        return Err("Password must not be empty".into());
    }

    let created = create_identity_with_iterations(password, iterations)?;
    let json = serde_json::to_string_pretty(&created.wrapped)?;

    match output_path {
        Some(path) => {
            std::fs::write(path, &json)?;
            let output = serde_json::json!({
                "publicKey": created.wrapped.public_key.to_base64(),
                "output": path.to_string_lossy(),
                "iterations": iterations,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn cmd_identity_recover(password: &str, input_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(input_path)?;
    let wrapped: WrappedIdentity = serde_json::from_str(&contents)?;

    let private = wrapped.recover(password)?;

    // The private key itself is never printed
    let output = serde_json::json!({
        "publicKey": private.public_key().to_base64(),
        "recovered": true,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn cmd_group_key() -> Result<(), Box<dyn std::error::Error>> {
    let key = GroupKey::generate();
    let output = serde_json::json!({
        "groupKey": chatapp_crypto::base64_encode(key.as_bytes()),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_transform_file<F>(
    input_path: &Path,
    output_path: &Path,
    transform: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&[u8]) -> chatapp_crypto::CryptoResult<Vec<u8>>,
{
    let input = std::fs::read(input_path)?;
    let result = transform(&input)?;
    std::fs::write(output_path, &result)?;

    let output = serde_json::json!({
        "input": input_path.to_string_lossy(),
        "output": output_path.to_string_lossy(),
        "input_size": input.len(),
        "output_size": result.len(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
