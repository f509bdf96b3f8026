use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitValidationError {
    TooManyIds(String),
    TooManyIdsRequested(String),
}

/// Bounds the id-allow-list accepted by the filter builder (§4.6) to
/// `config.filter_id_list_cap` entries, used for lasso-selection queries.
pub fn validate_id_allow_list(config: &AppConfig, ids: &[String]) -> Result<(), LimitValidationError> {
    if ids.len() > config.filter_id_list_cap {
        return Err(LimitValidationError::TooManyIds(format!(
            "id list has {} entries, maximum allowed is {}",
            ids.len(),
            config.filter_id_list_cap
        )));
    }
    Ok(())
}

/// Bounds `GET /samples/batch-annotations` to `config.batch_annotations_cap` ids.
pub fn validate_batch_annotations_request(
    config: &AppConfig,
    ids: &[String],
) -> Result<(), LimitValidationError> {
    if ids.len() > config.batch_annotations_cap {
        return Err(LimitValidationError::TooManyIdsRequested(format!(
            "requested {} sample ids, maximum allowed is {}",
            ids.len(),
            config.batch_annotations_cap
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn validate_id_allow_list_rejects_over_cap() {
        let config = AppConfig {
            filter_id_list_cap: 3,
            ..Default::default()
        };
        let result = validate_id_allow_list(&config, &ids(4));
        assert!(matches!(result, Err(LimitValidationError::TooManyIds(_))));
    }

    #[test]
    fn validate_id_allow_list_accepts_at_cap() {
        let config = AppConfig {
            filter_id_list_cap: 3,
            ..Default::default()
        };
        assert!(validate_id_allow_list(&config, &ids(3)).is_ok());
    }

    #[test]
    fn validate_batch_annotations_request_rejects_over_cap() {
        let config = AppConfig {
            batch_annotations_cap: 2,
            ..Default::default()
        };
        let result = validate_batch_annotations_request(&config, &ids(3));
        assert!(matches!(
            result,
            Err(LimitValidationError::TooManyIdsRequested(_))
        ));
    }
}
