// concept_service/src/axioms.rs

use std::collections::BTreeSet;

use models::errors::{ServiceError, ServiceResult};
use once_cell::sync::Lazy;
use regex::Regex;

static CONCEPT_REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\d{4,18})\b").unwrap());

/// Extracts concept references from OWL functional-syntax expressions.
#[derive(Clone, Default)]
pub struct AxiomConversionService;

impl AxiomConversionService {
    pub fn new() -> Self {
        AxiomConversionService
    }

    /// The set of concept ids referenced anywhere in the expression,
    /// including the defined class itself. Parsing the same expression
    /// twice yields the same set.
    pub fn get_referenced_concepts(&self, owl_expression: &str) -> ServiceResult<BTreeSet<i64>> {
        let mut depth: i32 = 0;
        for character in owl_expression.chars() {
            match character {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ServiceError::Conversion(format!(
                            "Unbalanced parentheses in OWL expression: {}",
                            owl_expression
                        )));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(ServiceError::Conversion(format!(
                "Unbalanced parentheses in OWL expression: {}",
                owl_expression
            )));
        }
        let referenced: BTreeSet<i64> = CONCEPT_REFERENCE_PATTERN
            .captures_iter(owl_expression)
            .filter_map(|capture| capture[1].parse::<i64>().ok())
            .collect();
        if referenced.is_empty() {
            return Err(ServiceError::Conversion(format!(
                "No concept references found in OWL expression: {}",
                owl_expression
            )));
        }
        Ok(referenced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_concepts_are_extracted_and_stable() {
        let service = AxiomConversionService::new();
        let expression = "SubClassOf(:100000 ObjectIntersectionOf(:138875005 ObjectSomeValuesFrom(:116680003 :900000000000441003)))";
        let first = service.get_referenced_concepts(expression).unwrap();
        let second = service.get_referenced_concepts(expression).unwrap();
        assert_eq!(first, second);
        assert!(first.contains(&100000));
        assert!(first.contains(&116680003));
        assert!(first.contains(&900000000000441003));
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn unbalanced_expression_is_a_conversion_error() {
        let service = AxiomConversionService::new();
        let result = service.get_referenced_concepts("SubClassOf(:100000 ObjectIntersectionOf(:138875005)");
        assert!(matches!(result, Err(ServiceError::Conversion(_))));
    }

    #[test]
    fn expression_without_references_is_rejected() {
        let service = AxiomConversionService::new();
        assert!(service.get_referenced_concepts("Prefix(=<http://snomed.info/sct>)").is_err());
    }
}
