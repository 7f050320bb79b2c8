use thiserror::Error;

use crate::engine::EngineError;

/// Taxonomía de errores de la pipeline de carga.
///
/// Todos se recuperan localmente en el loader/controller y terminan como un
/// único aviso al usuario; ninguno detiene el drenado del backlog.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("petición rechazada por el control de admisión")]
    AdmissionDenied,

    #[error("no se encontró nada para `{0}`")]
    ResolutionNoMatch(String),

    #[error("{0}")]
    ResolutionFailedCommon(String),

    #[error("fallo inesperado al resolver `{identifier}`")]
    ResolutionFailedUnexpected {
        identifier: String,
        #[source]
        source: EngineError,
    },

    #[error("la cola alcanzó el límite de {0} tracks")]
    QueueCapacityExceeded(usize),

    #[error("la descripción no contiene suficientes timestamps para dividir el track")]
    SplitParseFailed,
}
