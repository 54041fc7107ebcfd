//! Replies to bot commands.

use crate::approval::ActionLedger;
use crate::gateway::{GatewayError, MessagingGateway};
use crate::service::TriageStats;
use crate::video::{SizeThresholds, BYTES_PER_MB};
use std::sync::Arc;
use tracing::{info, warn};

/// A command sent to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Stats,
    Unknown(String),
}

impl Command {
    /// Parse the first word of `text`.
    ///
    /// Returns `None` for anything that is not a command. A `@botname`
    /// suffix is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        if !word.starts_with('/') {
            return None;
        }
        let name = word
            .split('@')
            .next()
            .unwrap_or(word)
            .to_lowercase();

        Some(match name.as_str() {
            "/start" => Command::Start,
            "/help" => Command::Help,
            "/status" => Command::Status,
            "/stats" => Command::Stats,
            _ => Command::Unknown(word.to_string()),
        })
    }
}

pub const HELP_TEXT: &str = "📋 Comandos disponibles:\n\n\
    /start - Iniciar el bot\n\
    /help - Mostrar esta ayuda\n\
    /status - Ver estado del bot\n\
    /stats - Ver estadísticas\n\n\
    🎥 Funcionalidades:\n\n\
    • Videos cortos: se reenvían al chat de destino\n\
    • Videos medianos: requieren aprobación\n\
    • Videos largos: se descargan y almacenan\n\n\
    Simplemente envía un video al grupo de entrada.";

pub const STATUS_TEXT: &str = "✅ Estado del Bot\n\n\
    • Bot: Activo\n\
    • Conexión: OK\n\
    • Procesamiento: Listo\n\n\
    ¡Todo funcionando correctamente!";

pub const UNKNOWN_TEXT: &str =
    "❓ Comando no reconocido.\n\nEnvía /help para ver los comandos disponibles.";

/// Answers commands from any chat
pub struct CommandResponder {
    gateway: Arc<dyn MessagingGateway>,
    ledger: Arc<ActionLedger>,
    stats: Arc<TriageStats>,
    thresholds: SizeThresholds,
    input_chat_id: i64,
}

impl CommandResponder {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        ledger: Arc<ActionLedger>,
        stats: Arc<TriageStats>,
        thresholds: SizeThresholds,
        input_chat_id: i64,
    ) -> Self {
        Self {
            gateway,
            ledger,
            stats,
            thresholds,
            input_chat_id,
        }
    }

    pub fn start_text(&self) -> String {
        let short_mb = self.thresholds.short_max() / BYTES_PER_MB;
        let medium_mb = self.thresholds.medium_max() / BYTES_PER_MB;
        format!(
            "🤖 ¡Hola! Soy Peque Bot\n\n\
             Puedo ayudarte a gestionar videos según su tamaño:\n\
             • Videos cortos (< {short_mb} MB)\n\
             • Videos medianos ({short_mb} MB - {medium_mb} MB)\n\
             • Videos largos (≥ {medium_mb} MB)\n\n\
             Envía /help para más información."
        )
    }

    pub async fn stats_text(&self) -> String {
        let stats = self.stats.snapshot();
        let recent = match self.gateway.list_recent_videos(self.input_chat_id).await {
            Ok(videos) => videos.len().to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to list recent videos");
                "--".to_string()
            }
        };

        format!(
            "📊 Estadísticas\n\n\
             • Videos procesados: {}\n\
             • Cortos: {} · Medianos: {} · Largos: {}\n\
             • Videos pendientes de aprobación: {}\n\
             • Videos recientes en el grupo: {}\n\
             • Errores: {}",
            stats.total_videos(),
            stats.short,
            stats.medium,
            stats.long,
            self.ledger.pending_count(),
            recent,
            stats.failures,
        )
    }

    /// Reply to `command` in `chat_id`
    pub async fn respond(&self, chat_id: i64, command: &Command) -> Result<(), GatewayError> {
        let text = match command {
            Command::Start => self.start_text(),
            Command::Help => HELP_TEXT.to_string(),
            Command::Status => STATUS_TEXT.to_string(),
            Command::Stats => self.stats_text().await,
            Command::Unknown(name) => {
                warn!(chat_id, command = %name, "Unknown command");
                UNKNOWN_TEXT.to_string()
            }
        };

        self.gateway.send_text(chat_id, &text).await?;
        info!(chat_id, command = ?command, "Command answered");
        Ok(())
    }
}
