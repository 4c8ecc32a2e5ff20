//! Error types for the playback core.
//!
//! Every operation of the audio core returns [`AudioError`]. The bot layer
//! turns them into user-facing embeds, the dispatcher logs them and moves
//! on to the next policy step.

use thiserror::Error;

pub type AudioResult<T> = Result<T, AudioError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    /// Posición, volumen o argumento fuera de rango. No hay cambio de estado.
    #[error("Valor inválido: {0}")]
    Validation(String),

    /// El nodo no está en estado Ready.
    #[error("El nodo de audio no está disponible")]
    NodeUnavailable,

    /// El nodo no respondió dentro del timeout configurado.
    #[error("El nodo de audio no respondió a tiempo")]
    NodeTimeout,

    /// La sesión fue destruida mientras la operación estaba en curso.
    #[error("La sesión de reproducción ya no existe")]
    SessionGone,

    #[error("No autorizado: {0}")]
    Unauthorized(String),

    /// El nodo respondió con un error de protocolo o de HTTP.
    #[error("Error del nodo de audio: {0}")]
    Node(String),

    #[error("Error de conexión de voz: {0}")]
    Voice(String),

    #[error("Error de almacenamiento: {0}")]
    Storage(String),
}

impl AudioError {
    /// Errors worth one more attempt inside the dispatcher's playback start.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AudioError::NodeUnavailable | AudioError::NodeTimeout | AudioError::Node(_)
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AudioError::Validation(msg.into())
    }
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AudioError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AudioError::NodeTimeout
        } else if err.is_connect() {
            AudioError::NodeUnavailable
        } else {
            AudioError::Node(err.to_string())
        }
    }
}
