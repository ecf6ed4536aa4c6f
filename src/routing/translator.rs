//! Translation of generic persistence errors into specific ones.

use crate::error::{ConstraintKind, DbError};

/// Turns a generic persistence error into a more specific one.
///
/// Returning `None` means "no translation"; the caller then sees the original error.
pub trait ErrorTranslator: Send + Sync {
    fn translate(&self, err: &DbError) -> Option<DbError>;
}

impl<F> ErrorTranslator for F
where
    F: Fn(&DbError) -> Option<DbError> + Send + Sync,
{
    fn translate(&self, err: &DbError) -> Option<DbError> {
        self(err)
    }
}

/// Translator driven by the driver's constraint classification and SQLSTATE.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStateTranslator;

impl ErrorTranslator for SqlStateTranslator {
    fn translate(&self, err: &DbError) -> Option<DbError> {
        let DbError::Database {
            message,
            sql_state,
            constraint,
        } = err
        else {
            return None;
        };
        let message = message.clone();
        let state = sql_state.as_deref();
        let sql_state = sql_state.clone();

        match (constraint, state) {
            (Some(ConstraintKind::Unique), _) | (None, Some("23505")) => {
                Some(DbError::DuplicateKey { message, sql_state })
            }
            (Some(_), _) => Some(DbError::DataIntegrityViolation { message, sql_state }),
            (None, Some(s)) if s.starts_with("23") => {
                Some(DbError::DataIntegrityViolation { message, sql_state })
            }
            (None, Some("40001" | "40P01")) => {
                Some(DbError::ConcurrencyFailure { message, sql_state })
            }
            (None, Some(s)) if s.starts_with("42") => {
                Some(DbError::BadSqlGrammar { message, sql_state })
            }
            _ => None,
        }
    }
}
