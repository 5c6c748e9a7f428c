// mrcm_service/src/generator.rs

use std::collections::BTreeMap;

use crate::model::{AttributeDomain, AttributeRange, Domain, RuleStrength};

/// Pure generator deriving the denormalised MRCM artefacts from the
/// rulebook: domain templates for pre/postcoordination and per-attribute
/// rules. Output depends only on the inputs; the update service decides
/// what to persist.
#[derive(Clone, Default)]
pub struct MrcmDomainTemplatesAndRuleGenerator;

impl MrcmDomainTemplatesAndRuleGenerator {
    pub fn new() -> Self {
        MrcmDomainTemplatesAndRuleGenerator
    }

    /// Recompute both templates of every domain; returns the domains whose
    /// stored templates no longer match.
    pub fn generate_domain_templates(
        &self,
        domains_by_domain_id: &BTreeMap<String, Domain>,
        domain_to_attributes: &BTreeMap<String, Vec<AttributeDomain>>,
        attribute_to_ranges: &BTreeMap<String, Vec<AttributeRange>>,
        concept_to_term: &BTreeMap<String, String>,
        data_attributes: &[i64],
    ) -> Vec<Domain> {
        let mut updated = Vec::new();
        for (domain_id, domain) in domains_by_domain_id {
            let attributes = domain_to_attributes.get(domain_id).cloned().unwrap_or_default();
            let precoordination = self.domain_template(
                domain,
                &attributes,
                attribute_to_ranges,
                concept_to_term,
                data_attributes,
                true,
            );
            let postcoordination = self.domain_template(
                domain,
                &attributes,
                attribute_to_ranges,
                concept_to_term,
                data_attributes,
                false,
            );
            if precoordination != domain.domain_template_for_precoordination
                || postcoordination != domain.domain_template_for_postcoordination
            {
                let mut changed = domain.clone();
                changed.domain_template_for_precoordination = precoordination;
                changed.domain_template_for_postcoordination = postcoordination;
                updated.push(changed);
            }
        }
        updated
    }

    /// Recompute the rule of every constrained attribute; returns the
    /// ranges whose stored rule no longer matches.
    pub fn generate_attribute_rules(
        &self,
        domains_by_domain_id: &BTreeMap<String, Domain>,
        attribute_to_domains: &BTreeMap<String, Vec<AttributeDomain>>,
        attribute_to_ranges: &BTreeMap<String, Vec<AttributeRange>>,
        concept_to_term: &BTreeMap<String, String>,
        data_attributes: &[i64],
    ) -> Vec<AttributeRange> {
        let mut updated = Vec::new();
        for (attribute_id, attribute_domains) in attribute_to_domains {
            let Some(ranges) = attribute_to_ranges.get(attribute_id) else {
                continue;
            };
            let mut constraints: Vec<String> = attribute_domains
                .iter()
                .filter(|attribute_domain| attribute_domain.rule_strength == RuleStrength::Mandatory)
                .filter_map(|attribute_domain| domains_by_domain_id.get(&attribute_domain.domain_id))
                .map(|domain| non_empty_or(&domain.proximal_primitive_constraint, &domain.domain_constraint))
                .collect();
            constraints.sort();
            constraints.dedup();
            if constraints.is_empty() {
                continue;
            }
            let grouped = attribute_domains
                .iter()
                .filter(|attribute_domain| attribute_domain.rule_strength == RuleStrength::Mandatory)
                .any(|attribute_domain| attribute_domain.grouped)
                && !is_data_attribute(attribute_id, data_attributes);
            let cardinality = attribute_domains
                .iter()
                .find(|attribute_domain| attribute_domain.rule_strength == RuleStrength::Mandatory)
                .map(|attribute_domain| {
                    if grouped {
                        attribute_domain.attribute_in_group_cardinality.clone()
                    } else {
                        attribute_domain.attribute_cardinality.clone()
                    }
                })
                .unwrap_or_default();
            let term = concept_to_term
                .get(attribute_id)
                .cloned()
                .unwrap_or_else(|| attribute_id.clone());
            let domain_part = if constraints.len() > 1 {
                format!("({})", constraints.join(" OR "))
            } else {
                constraints[0].clone()
            };
            for range in ranges {
                if range.rule_strength != RuleStrength::Mandatory {
                    continue;
                }
                let refinement = format!("[[{}]] {} |{}| = ({})", cardinality, attribute_id, term, range.range_constraint);
                let rule = if grouped {
                    format!("{}: {{ {} }}", domain_part, refinement)
                } else {
                    format!("{}: {}", domain_part, refinement)
                };
                if rule != range.attribute_rule {
                    let mut changed = range.clone();
                    changed.attribute_rule = rule;
                    updated.push(changed);
                }
            }
        }
        updated
    }

    fn domain_template(
        &self,
        domain: &Domain,
        attributes: &[AttributeDomain],
        attribute_to_ranges: &BTreeMap<String, Vec<AttributeRange>>,
        concept_to_term: &BTreeMap<String, String>,
        data_attributes: &[i64],
        precoordination: bool,
    ) -> String {
        let constraint = non_empty_or(&domain.proximal_primitive_constraint, &domain.domain_constraint);
        let mut ungrouped_parts: Vec<String> = Vec::new();
        let mut grouped_parts: Vec<String> = Vec::new();

        let mut applicable: Vec<&AttributeDomain> = attributes
            .iter()
            .filter(|attribute_domain| attribute_domain.rule_strength == RuleStrength::Mandatory)
            .filter(|attribute_domain| {
                if precoordination {
                    attribute_domain.content_type.applies_to_precoordination()
                } else {
                    attribute_domain.content_type.applies_to_postcoordination()
                }
            })
            .collect();
        applicable.sort_by(|a, b| a.referenced_component_id.cmp(&b.referenced_component_id));

        for attribute_domain in applicable {
            let attribute_id = &attribute_domain.referenced_component_id;
            let Some(range) = attribute_to_ranges
                .get(attribute_id)
                .and_then(|ranges| ranges.iter().find(|range| range.rule_strength == RuleStrength::Mandatory))
            else {
                continue;
            };
            let term = concept_to_term
                .get(attribute_id)
                .cloned()
                .unwrap_or_else(|| attribute_id.clone());
            if attribute_domain.grouped && !is_data_attribute(attribute_id, data_attributes) {
                grouped_parts.push(format!(
                    "[[{}]] {} |{}| = ({})",
                    attribute_domain.attribute_in_group_cardinality, attribute_id, term, range.range_constraint
                ));
            } else {
                ungrouped_parts.push(format!(
                    "[[{}]] {} |{}| = ({})",
                    attribute_domain.attribute_cardinality, attribute_id, term, range.range_constraint
                ));
            }
        }

        let mut parts = ungrouped_parts;
        if !grouped_parts.is_empty() {
            parts.push(format!("{{ {} }}", grouped_parts.join(", ")));
        }
        if parts.is_empty() {
            constraint
        } else {
            format!("{}: {}", constraint, parts.join(", "))
        }
    }
}

fn non_empty_or(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_string()
    } else {
        preferred.to_string()
    }
}

fn is_data_attribute(attribute_id: &str, data_attributes: &[i64]) -> bool {
    attribute_id
        .parse::<i64>()
        .map(|id| data_attributes.contains(&id))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentType;

    fn rulebook() -> (
        BTreeMap<String, Domain>,
        BTreeMap<String, Vec<AttributeDomain>>,
        BTreeMap<String, Vec<AttributeRange>>,
        BTreeMap<String, String>,
    ) {
        let domain = Domain {
            id: "dom-member-1".to_string(),
            referenced_component_id: "404684003".to_string(),
            domain_constraint: "<< 404684003 |Clinical finding|".to_string(),
            proximal_primitive_constraint: "<< 404684003".to_string(),
            ..Domain::default()
        };
        let attribute_domain = AttributeDomain {
            id: "ad-member-1".to_string(),
            referenced_component_id: "363698007".to_string(),
            domain_id: "404684003".to_string(),
            grouped: true,
            attribute_cardinality: "0..*".to_string(),
            attribute_in_group_cardinality: "0..1".to_string(),
            rule_strength: RuleStrength::Mandatory,
            content_type: ContentType::All,
        };
        let attribute_range = AttributeRange {
            id: "ar-member-1".to_string(),
            referenced_component_id: "363698007".to_string(),
            range_constraint: "<< 442083009 |Anatomical or acquired body structure|".to_string(),
            attribute_rule: String::new(),
            rule_strength: RuleStrength::Mandatory,
            content_type: ContentType::All,
        };
        let domains = BTreeMap::from([("404684003".to_string(), domain)]);
        let attribute_domains = BTreeMap::from([("363698007".to_string(), vec![attribute_domain])]);
        let ranges = BTreeMap::from([("363698007".to_string(), vec![attribute_range])]);
        let terms = BTreeMap::from([
            ("404684003".to_string(), "Clinical finding (finding)".to_string()),
            ("363698007".to_string(), "Finding site".to_string()),
        ]);
        (domains, attribute_domains, ranges, terms)
    }

    #[test]
    fn attribute_rules_are_deterministic_and_only_report_changes() {
        let generator = MrcmDomainTemplatesAndRuleGenerator::new();
        let (domains, attribute_domains, ranges, terms) = rulebook();

        let first = generator.generate_attribute_rules(&domains, &attribute_domains, &ranges, &terms, &[]);
        assert_eq!(first.len(), 1);
        let rule = &first[0].attribute_rule;
        assert!(rule.contains("363698007 |Finding site|"));
        assert!(rule.starts_with("<< 404684003: {"));

        // Feeding the generated rule back in reports no further change.
        let mut ranges_after = ranges.clone();
        ranges_after.get_mut("363698007").unwrap()[0].attribute_rule = rule.clone();
        let second = generator.generate_attribute_rules(&domains, &attribute_domains, &ranges_after, &terms, &[]);
        assert!(second.is_empty());
    }

    #[test]
    fn data_attributes_are_never_grouped() {
        let generator = MrcmDomainTemplatesAndRuleGenerator::new();
        let (domains, attribute_domains, ranges, terms) = rulebook();
        let rules = generator.generate_attribute_rules(&domains, &attribute_domains, &ranges, &terms, &[363698007]);
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].attribute_rule.contains('{'));
        // The ungrouped cardinality applies.
        assert!(rules[0].attribute_rule.contains("[[0..*]]"));
    }

    #[test]
    fn domain_templates_group_grouped_attributes() {
        let generator = MrcmDomainTemplatesAndRuleGenerator::new();
        let (domains, attribute_domains, ranges, terms) = rulebook();
        let mut domain_to_attributes = BTreeMap::new();
        domain_to_attributes.insert(
            "404684003".to_string(),
            attribute_domains.get("363698007").unwrap().clone(),
        );
        let updated = generator.generate_domain_templates(&domains, &domain_to_attributes, &ranges, &terms, &[]);
        assert_eq!(updated.len(), 1);
        let template = &updated[0].domain_template_for_precoordination;
        assert_eq!(
            template,
            "<< 404684003: { [[0..1]] 363698007 |Finding site| = (<< 442083009 |Anatomical or acquired body structure|) }"
        );
        // Both coordination forms were derived.
        assert!(!updated[0].domain_template_for_postcoordination.is_empty());
    }
}
