//! Interface de linha de comando do pipeline baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, upload, track,
//! download, refs) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Envia dados de captura, executa jobs de reconstrução e baixa os resultados.
#[derive(Debug, Parser)]
#[command(name = "reality-pipeline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: `pipeline.toml` no diretório atual).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um job completo: upload, submissão, acompanhamento e download.
    Run {
        /// Arquivo JSON ou TOML com a definição do job.
        #[arg(long)]
        file: PathBuf,
    },

    /// Envia apenas as entradas do job que ainda não estão na nuvem.
    Upload {
        #[arg(long)]
        file: PathBuf,
    },

    /// Acompanha um job já submetido até o término.
    Track {
        job_id: String,
    },

    /// Baixa as saídas declaradas de um job terminado.
    Download {
        job_id: String,

        /// Diretório de destino das saídas.
        #[arg(long, default_value = "outputs")]
        output_dir: PathBuf,
    },

    /// Lista a tabela de referências caminho local → ID na nuvem.
    Refs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["reality-pipeline", "run", "--file", "job.toml"]);
        match cli.command {
            Command::Run { file } => assert_eq!(file, PathBuf::from("job.toml")),
            _ => panic!("expected Run command"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "reality-pipeline",
            "--config",
            "other.toml",
            "--verbose",
            "refs",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("other.toml")));
        assert!(matches!(cli.command, Command::Refs));
    }

    #[test]
    fn cli_parses_download_with_default_dir() {
        let cli = Cli::parse_from(["reality-pipeline", "download", "job-1"]);
        match cli.command {
            Command::Download { job_id, output_dir } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(output_dir, PathBuf::from("outputs"));
            }
            _ => panic!("expected Download command"),
        }
    }

    #[test]
    fn cli_requires_job_file() {
        assert!(Cli::try_parse_from(["reality-pipeline", "upload"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
