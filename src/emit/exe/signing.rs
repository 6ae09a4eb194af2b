// src/emit/exe/signing.rs

//! Authenticode signing of the produced `.exe`
//!
//! Two tools are supported: Microsoft `signtool` with a PFX file (or a
//! certificate thumbprint from the store) and `AzureSignTool` with a key
//! vault. Tool locations, digests and credentials come from the
//! environment so they stay out of recipes.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::recipe::SigningTool;

pub const ENV_SIGNTOOL_PATH: &str = "CONSTRUCTOR_SIGNTOOL_PATH";
pub const ENV_TIMESTAMP_SERVER_URL: &str = "CONSTRUCTOR_SIGNTOOL_TIMESTAMP_SERVER_URL";
pub const ENV_TIMESTAMP_DIGEST: &str = "CONSTRUCTOR_SIGNTOOL_TIMESTAMP_DIGEST";
pub const ENV_FILE_DIGEST: &str = "CONSTRUCTOR_SIGNTOOL_FILE_DIGEST";
pub const ENV_PFX_PASSWORD: &str = "CONSTRUCTOR_PFX_CERTIFICATE_PASSWORD";

const AZURE_VARS: [(&str, &str); 5] = [
    ("AZURE_SIGNTOOL_KEY_VAULT_URL", "-kvu"),
    ("AZURE_SIGNTOOL_KEY_VAULT_CLIENT_ID", "-kvi"),
    ("AZURE_SIGNTOOL_KEY_VAULT_TENANT_ID", "-kvt"),
    ("AZURE_SIGNTOOL_KEY_VAULT_SECRET", "-kvs"),
    ("AZURE_SIGNTOOL_KEY_VAULT_ACCESSTOKEN", "-kva"),
];

/// Signing settings taken from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningEnv {
    pub tool_path: Option<PathBuf>,
    pub timestamp_server: Option<String>,
    pub timestamp_digest: String,
    pub file_digest: String,
    pub pfx_password: Option<String>,
    /// Key vault settings for AzureSignTool, as `(flag, value)`
    pub azure: Vec<(&'static str, String)>,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl SigningEnv {
    pub fn from_env() -> Self {
        Self {
            tool_path: non_empty(ENV_SIGNTOOL_PATH).map(PathBuf::from),
            timestamp_server: non_empty(ENV_TIMESTAMP_SERVER_URL),
            timestamp_digest: non_empty(ENV_TIMESTAMP_DIGEST).unwrap_or_else(|| "sha256".to_string()),
            file_digest: non_empty(ENV_FILE_DIGEST).unwrap_or_else(|| "sha256".to_string()),
            pfx_password: non_empty(ENV_PFX_PASSWORD),
            azure: AZURE_VARS
                .iter()
                .filter_map(|(var, flag)| non_empty(var).map(|v| (*flag, v)))
                .collect(),
        }
    }
}

/// Tool to sign with: the declared one, or `signtool` when only a
/// certificate is given
pub fn effective_tool(declared: Option<SigningTool>, certificate: Option<&Path>) -> Option<SigningTool> {
    declared.or_else(|| certificate.map(|_| SigningTool::Signtool))
}

fn default_program(tool: SigningTool) -> &'static str {
    match tool {
        SigningTool::Signtool => "signtool",
        SigningTool::Azuresigntool => "AzureSignTool",
    }
}

/// Build the signing command for `file`
///
/// `program` is the resolved tool executable. A `certificate` naming an
/// existing file is passed as a PFX; any other value is treated as a
/// certificate thumbprint (signtool) or key vault certificate name
/// (AzureSignTool).
pub fn sign_command(
    tool: SigningTool,
    program: &Path,
    env: &SigningEnv,
    certificate: Option<&Path>,
    file: &Path,
) -> Result<Command> {
    let mut cmd = Command::new(program);
    cmd.arg("sign");
    match tool {
        SigningTool::Signtool => {
            match certificate {
                Some(cert) if cert.is_file() => {
                    cmd.arg("/f").arg(cert);
                    if let Some(password) = &env.pfx_password {
                        cmd.arg("/p").arg(password);
                    }
                }
                Some(thumbprint) => {
                    let thumbprint = thumbprint.file_name().unwrap_or(thumbprint.as_os_str());
                    cmd.arg("/sha1").arg(thumbprint);
                }
                None => {
                    cmd.arg("/a");
                }
            }
            cmd.arg("/fd").arg(&env.file_digest);
            if let Some(server) = &env.timestamp_server {
                cmd.arg("/tr").arg(server).arg("/td").arg(&env.timestamp_digest);
            }
            cmd.arg("/v").arg(file);
        }
        SigningTool::Azuresigntool => {
            if !env.azure.iter().any(|(flag, _)| *flag == "-kvu") {
                return Err(Error::Emit(
                    "AzureSignTool needs AZURE_SIGNTOOL_KEY_VAULT_URL".to_string(),
                ));
            }
            for (flag, value) in &env.azure {
                cmd.arg(flag).arg(value);
            }
            let name = certificate
                .and_then(Path::file_name)
                .ok_or_else(|| Error::Emit("AzureSignTool needs signing_certificate".to_string()))?;
            cmd.arg("-kvc").arg(name);
            cmd.arg("-fd").arg(&env.file_digest);
            if let Some(server) = &env.timestamp_server {
                cmd.arg("-tr").arg(server).arg("-td").arg(&env.timestamp_digest);
            }
            cmd.arg("-v").arg(file);
        }
    }
    Ok(cmd)
}

/// Executable for `tool`: `CONSTRUCTOR_SIGNTOOL_PATH`, else found on `PATH`
pub fn resolve_program(tool: SigningTool, env: &SigningEnv) -> Result<PathBuf> {
    match &env.tool_path {
        Some(path) if path.is_file() => Ok(path.clone()),
        Some(path) => Err(Error::ToolNotFound(path.display().to_string())),
        None => crate::process::find_tool(default_program(tool)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::command_line;
    use tempfile::TempDir;

    fn env() -> SigningEnv {
        SigningEnv {
            timestamp_digest: "sha256".to_string(),
            file_digest: "sha256".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_effective_tool() {
        assert_eq!(effective_tool(None, None), None);
        assert_eq!(
            effective_tool(None, Some(Path::new("cert.pfx"))),
            Some(SigningTool::Signtool)
        );
        assert_eq!(
            effective_tool(Some(SigningTool::Azuresigntool), None),
            Some(SigningTool::Azuresigntool)
        );
    }

    #[test]
    fn test_signtool_with_pfx() {
        let dir = TempDir::new().unwrap();
        let pfx = dir.path().join("cert.pfx");
        std::fs::write(&pfx, b"pfx").unwrap();
        let mut env = env();
        env.pfx_password = Some("hunter2".to_string());
        env.timestamp_server = Some("http://timestamp.example.com".to_string());

        let cmd = sign_command(SigningTool::Signtool, Path::new("signtool"), &env, Some(&pfx), Path::new("Setup.exe"))
            .unwrap();
        let line = command_line(&cmd);
        assert_eq!(line[..3], ["signtool", "sign", "/f"]);
        assert!(line.windows(2).any(|w| w == ["/p", "hunter2"]));
        assert!(line.windows(2).any(|w| w == ["/fd", "sha256"]));
        assert!(line.windows(2).any(|w| w == ["/tr", "http://timestamp.example.com"]));
        assert_eq!(line[line.len() - 2..], ["/v", "Setup.exe"]);
    }

    #[test]
    fn test_signtool_with_thumbprint() {
        let cmd = sign_command(
            SigningTool::Signtool,
            Path::new("signtool"),
            &env(),
            Some(Path::new("/recipe/0123abcd")),
            Path::new("Setup.exe"),
        )
        .unwrap();
        let line = command_line(&cmd);
        assert!(line.windows(2).any(|w| w == ["/sha1", "0123abcd"]));
        assert!(!line.contains(&"/tr".to_string()));
    }

    #[test]
    fn test_azuresigntool() {
        let mut env = env();
        assert!(
            sign_command(SigningTool::Azuresigntool, Path::new("AzureSignTool"), &env, Some(Path::new("c")), Path::new("S.exe"))
                .is_err()
        );
        env.azure = vec![("-kvu", "https://vault.example.net".to_string()), ("-kvi", "client".to_string())];
        let cmd = sign_command(
            SigningTool::Azuresigntool,
            Path::new("AzureSignTool"),
            &env,
            Some(Path::new("/recipe/codesign-cert")),
            Path::new("S.exe"),
        )
        .unwrap();
        let line = command_line(&cmd);
        assert!(line.windows(2).any(|w| w == ["-kvu", "https://vault.example.net"]));
        assert!(line.windows(2).any(|w| w == ["-kvc", "codesign-cert"]));
        assert_eq!(line[line.len() - 2..], ["-v", "S.exe"]);
    }
}
