//! Inline conditional blocks: `{{#if key 'op' 'value'}}A{{else}}B{{/if}}`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::context::LookupScope;

static RE_CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\{\{#if\s+([\w.]+)\s+'(==|contains)'\s+'([^']*)'\}\}(.*?)\{\{else\}\}(.*?)\{\{/if\}\}",
    )
    .expect("conditional regex is valid")
});

static RE_CONDITIONAL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{#if\b.*?\{\{/if\}\}").expect("conditional block regex is valid")
});

/// Comparison operator of a conditional block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumConditionOp {
    /// Case-insensitive equality.
    Equals,
    /// Case-insensitive substring containment.
    Contains,
}

impl EnumConditionOp {
    /// Parse the quoted operator token.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(EnumConditionOp::Equals),
            "contains" => Some(EnumConditionOp::Contains),
            _ => None,
        }
    }
}

/// Evaluate one comparison; both sides are case-folded.
pub fn evaluate_condition(actual: &str, op: EnumConditionOp, expected: &str) -> bool {
    let c_actual = actual.to_lowercase();
    let c_expected = expected.to_lowercase();
    match op {
        EnumConditionOp::Equals => c_actual == c_expected,
        EnumConditionOp::Contains => c_actual.contains(&c_expected),
    }
}

/// Replace every well-formed conditional block with its chosen branch.
///
/// Missing keys compare as empty text. Malformed or unmatched blocks stay
/// verbatim.
pub fn evaluate_conditionals<S: LookupScope + ?Sized>(text: &str, scope: &S) -> String {
    if !text.contains("{{#if") {
        return text.to_string();
    }
    RE_CONDITIONAL
        .replace_all(text, |caps: &Captures<'_>| {
            let Some(op) = EnumConditionOp::parse(&caps[2]) else {
                return caps[0].to_string();
            };
            let c_actual = scope
                .lookup(&caps[1])
                .map(|value| value.to_text())
                .unwrap_or_default();
            if evaluate_condition(&c_actual, op, &caps[3]) {
                caps[4].to_string()
            } else {
                caps[5].to_string()
            }
        })
        .into_owned()
}

/// Drop every `{{#if ...}}...{{/if}}` block, both branches included.
pub fn strip_conditionals(text: &str) -> String {
    if !text.contains("{{#if") {
        return text.to_string();
    }
    RE_CONDITIONAL_BLOCK.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_equality_is_case_insensitive() {
        let ctx = DataContext::new().with_field("Status", "paid");
        assert_eq!(
            evaluate_conditionals("{{#if Status '==' 'Paid'}}PAID{{else}}UNPAID{{/if}}", &ctx),
            "PAID"
        );
        let ctx = DataContext::new().with_field("Status", "Open");
        assert_eq!(
            evaluate_conditionals("{{#if Status '==' 'Paid'}}PAID{{else}}UNPAID{{/if}}", &ctx),
            "UNPAID"
        );
    }

    #[test]
    fn test_contains_and_dotted_keys() {
        let ctx = DataContext::new().with_field("Contract__r.Incoterms__c", "FOB Hai Phong");
        let text = "Term: {{#if Contract__r.Incoterms__c 'contains' 'fob'}}FOB\nport{{else}}CIF{{/if}}.";
        assert_eq!(evaluate_conditionals(text, &ctx), "Term: FOB\nport.");
    }

    #[test]
    fn test_missing_key_takes_else_branch() {
        let ctx = DataContext::new();
        assert_eq!(
            evaluate_conditionals("{{#if Ghost '==' 'x'}}yes{{else}}no{{/if}}", &ctx),
            "no"
        );
    }

    #[test]
    fn test_malformed_blocks_stay_verbatim() {
        let ctx = DataContext::new().with_field("A", "1");
        for text in [
            "{{#if A '!=' '1'}}x{{else}}y{{/if}}",
            "{{#if A '==' '1'}}x{{/if}}",
            "{{#if A '==' '1'}}x{{else}}y",
        ] {
            assert_eq!(evaluate_conditionals(text, &ctx), text);
        }
    }

    #[test]
    fn test_multiple_blocks_in_one_cell() {
        let ctx = DataContext::new().with_field("A", "x").with_field("B", "y");
        let text = "{{#if A '==' 'x'}}1{{else}}0{{/if}}-{{#if B '==' 'x'}}1{{else}}0{{/if}}";
        assert_eq!(evaluate_conditionals(text, &ctx), "1-0");
    }

    #[test]
    fn test_strip_conditionals_drops_both_branches() {
        assert_eq!(
            strip_conditionals("Pay {{#if A '==' 'x'}}now{{else}}later{{/if}} ok"),
            "Pay  ok"
        );
        assert_eq!(strip_conditionals("{{#if A '==' 'x'}}only{{/if}}"), "");
        assert_eq!(strip_conditionals("no blocks {{A}}"), "no blocks {{A}}");
    }
}
