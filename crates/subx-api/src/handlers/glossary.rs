//! Per-user glossary terms.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use subx_db::GlossaryTermRow;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GlossaryQuery {
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
}

impl GlossaryQuery {
    fn matches(&self, term: &GlossaryTermRow) -> bool {
        fn side(filter: &Option<String>, lang: &Option<String>) -> bool {
            match (filter.as_deref(), lang.as_deref()) {
                (Some(want), Some(have)) => want == have,
                _ => true,
            }
        }
        side(&self.source_lang, &term.source_lang) && side(&self.target_lang, &term.target_lang)
    }
}

/// `GET /api/glossary`
pub async fn list_terms(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<GlossaryQuery>,
) -> ApiResult<Json<Vec<GlossaryTermRow>>> {
    let terms = state
        .store
        .list_glossary(&user.id)
        .await?
        .into_iter()
        .filter(|t| query.matches(t))
        .collect();
    Ok(Json(terms))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTermRequest {
    #[validate(length(min = 1, max = 500))]
    pub source_term: String,
    #[validate(length(min = 1, max = 500))]
    pub target_term: String,
    #[validate(length(min = 2, max = 10))]
    pub source_lang: Option<String>,
    #[validate(length(min = 2, max = 10))]
    pub target_lang: Option<String>,
}

/// `POST /api/glossary`
pub async fn create_term(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateTermRequest>,
) -> ApiResult<(StatusCode, Json<GlossaryTermRow>)> {
    request.validate()?;

    let source_term = request.source_term.trim();
    let target_term = request.target_term.trim();
    if source_term.is_empty() || target_term.is_empty() {
        return Err(ApiError::bad_request("Both terms are required"));
    }

    let mut term = GlossaryTermRow::new(user.id.clone(), source_term, target_term);
    term.source_lang = request.source_lang;
    term.target_lang = request.target_lang;
    let term = state.store.insert_glossary_term(&term).await?;
    Ok((StatusCode::CREATED, Json(term)))
}

/// `DELETE /api/glossary/:id`
pub async fn delete_term(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete_glossary_term(&user.id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Glossary term not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_filters_by_language() {
        let mut en_tr = GlossaryTermRow::new("u1", "ship", "gemi");
        en_tr.source_lang = Some("en".into());
        en_tr.target_lang = Some("tr".into());
        let any = GlossaryTermRow::new("u1", "Acme", "Acme");

        let query = GlossaryQuery {
            source_lang: Some("en".into()),
            target_lang: Some("de".into()),
        };
        assert!(!query.matches(&en_tr));
        assert!(query.matches(&any));

        let query = GlossaryQuery {
            source_lang: Some("en".into()),
            target_lang: None,
        };
        assert!(query.matches(&en_tr));
        assert!(GlossaryQuery::default().matches(&en_tr));
    }
}
