//! ABAC delegation condition for Owner assignments.
//!
//! An Owner at subscription scope can hand out any role. The condition built
//! here constrains that: the principal may not create or delete assignments
//! of the roles in [`DENIED_ROLE_DEFINITIONS`]. It uses the documented
//! "constrain roles" condition shape for `roleAssignments/write` and
//! `roleAssignments/delete`.

use crate::confirm::ConfirmationProvider;
use crate::directory::{DirectoryProvider, NewRoleAssignment, RoleAssignmentRecord};
use crate::error::{ProvisionError, ProvisionResult};
use crate::model::role_definitions;
use crate::report::Outcome;
use log::{debug, warn};

/// Role definitions an Owner may never assign or remove.
pub const DENIED_ROLE_DEFINITIONS: [&str; 4] = [
    role_definitions::OWNER,
    role_definitions::CONTRIBUTOR,
    role_definitions::USER_ACCESS_ADMINISTRATOR,
    role_definitions::RBAC_ADMINISTRATOR,
];

const WRITE_ACTION: &str = "Microsoft.Authorization/roleAssignments/write";
const DELETE_ACTION: &str = "Microsoft.Authorization/roleAssignments/delete";

/// Whether an assignment of this role at this scope must carry the condition.
pub fn requires_condition(role_definition_id: &str, scope: &str) -> bool {
    role_definition_id.eq_ignore_ascii_case(role_definitions::OWNER) && is_subscription_scope(scope)
}

/// `/subscriptions/<id>` with nothing below it.
pub fn is_subscription_scope(scope: &str) -> bool {
    let segments: Vec<&str> = scope.trim_matches('/').split('/').collect();
    segments.len() == 2 && segments[0].eq_ignore_ascii_case("subscriptions") && !segments[1].is_empty()
}

/// The delegation condition expression.
pub fn delegation_condition() -> String {
    let ids = DENIED_ROLE_DEFINITIONS.join(", ");
    format!(
        "((!(ActionMatches{{'{write}'}})) OR \
         (@Request[Microsoft.Authorization/roleAssignments:RoleDefinitionId] \
         ForAnyOfAllValues:GuidNotEquals {{{ids}}})) AND \
         ((!(ActionMatches{{'{delete}'}})) OR \
         (@Resource[Microsoft.Authorization/roleAssignments:RoleDefinitionId] \
         ForAnyOfAllValues:GuidNotEquals {{{ids}}}))",
        write = WRITE_ACTION,
        delete = DELETE_ACTION,
        ids = ids
    )
}

/// Whether `condition` blocks both actions for every denied role.
///
/// The condition is read as `ActionMatches` clauses joined by `AND`, each of
/// the form `(!(ActionMatches{..})) OR (<terms joined by AND>)`. For write
/// and for delete there must be a clause whose terms compare the
/// `RoleDefinitionId` attribute with `ForAnyOfAllValues:GuidNotEquals` over a
/// set holding every denied id. Extra `AND` terms or extra ids are stricter
/// than ours and still satisfy this, so remediation never downgrades an
/// assignment.
pub fn satisfies_deny_list(condition: Option<&str>) -> bool {
    let Some(condition) = condition else {
        return false;
    };
    let lowered = condition.to_ascii_lowercase();
    let clauses = action_clauses(&lowered);
    let Some(first) = clauses.first() else {
        return false;
    };
    if disjunctions(&lowered[..first.start]) > 0
        || clauses.iter().any(|c| !c.negated || disjunctions(c.text) != 1)
    {
        return false;
    }

    [(WRITE_ACTION, "@request["), (DELETE_ACTION, "@resource[")]
        .iter()
        .all(|(action, source)| {
            clauses
                .iter()
                .any(|c| c.guards(action) && c.denies_every_role(source))
        })
}

/// One `ActionMatches{..}` clause, running up to the next one.
struct ActionClause<'a> {
    start: usize,
    negated: bool,
    text: &'a str,
}

impl ActionClause<'_> {
    fn guards(&self, action: &str) -> bool {
        let rest = &self.text["actionmatches".len()..];
        braced_set(rest).is_some_and(|set| set.iter().any(|a| a.eq_ignore_ascii_case(action)))
    }

    fn denies_every_role(&self, source: &str) -> bool {
        self.text.match_indices(source).any(|(at, _)| {
            let rest = &self.text[at + source.len()..];
            let Some(close) = rest.find(']') else {
                return false;
            };
            if !rest[..close].ends_with(":roledefinitionid") {
                return false;
            }
            let rest = rest[close + 1..].trim_start();
            let Some(rest) = rest.strip_prefix("foranyofallvalues:guidnotequals") else {
                return false;
            };
            braced_set(rest).is_some_and(|set| {
                DENIED_ROLE_DEFINITIONS
                    .iter()
                    .all(|id| set.iter().any(|v| v.eq_ignore_ascii_case(id)))
            })
        })
    }
}

fn action_clauses(lowered: &str) -> Vec<ActionClause<'_>> {
    let starts: Vec<usize> = lowered
        .match_indices("actionmatches")
        .map(|(i, _)| i)
        .collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(lowered.len());
            let negated = lowered[..start]
                .trim_end_matches(|c: char| c == '(' || c.is_whitespace())
                .ends_with('!');
            ActionClause {
                start,
                negated,
                text: &lowered[start..end],
            }
        })
        .collect()
}

/// Count of `OR` tokens in an expression fragment.
fn disjunctions(fragment: &str) -> usize {
    fragment
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '{' | '}'))
        .filter(|token| *token == "or")
        .count()
}

/// Values of the `{a, 'b', c}` set at the start of `text`.
fn braced_set(text: &str) -> Option<Vec<&str>> {
    let inner = text.trim_start().strip_prefix('{')?;
    let close = inner.find('}')?;
    Some(
        inner[..close]
            .split(',')
            .map(|v| v.trim().trim_matches(|c: char| c == '\'' || c == '"'))
            .filter(|v| !v.is_empty())
            .collect(),
    )
}

/// What happened to one role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcedAssignment {
    pub assignment: RoleAssignmentRecord,
    pub outcome: Outcome,
    pub detail: String,
}

/// Ensure `principal_id` holds `role_definition_id` at `scope`.
///
/// New assignments get the delegation condition when
/// [`requires_condition`] says so. Existing assignments are reused as they
/// are unless they need the condition and do not satisfy the deny-list; each
/// of those is a finding that is only remediated after the operator confirms.
/// Declined findings come back as [`Outcome::Flagged`].
pub async fn ensure_role_assignment<D, C>(
    directory: &D,
    confirmation: &C,
    principal_id: &str,
    role_definition_id: &str,
    scope: &str,
) -> ProvisionResult<Vec<EnforcedAssignment>>
where
    D: DirectoryProvider,
    C: ConfirmationProvider + ?Sized,
{
    let needs_condition = requires_condition(role_definition_id, scope);
    let existing = directory
        .list_role_assignments(principal_id, role_definition_id, scope)
        .await
        .map_err(|e| {
            ProvisionError::remote(
                format!("list role assignments for '{}' at '{}'", principal_id, scope),
                e,
            )
        })?;

    if existing.is_empty() {
        let condition = needs_condition.then(delegation_condition);
        let created = directory
            .create_role_assignment(NewRoleAssignment {
                principal_id: principal_id.to_string(),
                role_definition_id: role_definition_id.to_string(),
                scope: scope.to_string(),
                condition,
            })
            .await
            .map_err(|e| {
                ProvisionError::remote(
                    format!("create role assignment for '{}' at '{}'", principal_id, scope),
                    e,
                )
            })?;
        let detail = if needs_condition {
            "created with delegation condition"
        } else {
            "created"
        };
        return Ok(vec![EnforcedAssignment {
            assignment: created,
            outcome: Outcome::Created,
            detail: detail.to_string(),
        }]);
    }

    let mut results = Vec::with_capacity(existing.len());
    for assignment in existing {
        if !needs_condition || satisfies_deny_list(assignment.condition.as_deref()) {
            debug!("Role assignment '{}' left as is", assignment.name);
            results.push(EnforcedAssignment {
                assignment,
                outcome: Outcome::Reused,
                detail: String::new(),
            });
            continue;
        }

        let finding = ProvisionError::UnprotectedPrivilegedAssignment {
            assignment_id: assignment.id.clone(),
            principal_id: assignment.principal_id.clone(),
            scope: assignment.scope.clone(),
        };
        warn!("{}", finding);

        let question = format!("{}. Add the delegation condition?", finding);
        if !confirmation.confirm(&question) {
            results.push(EnforcedAssignment {
                assignment,
                outcome: Outcome::Flagged,
                detail: finding.to_string(),
            });
            continue;
        }

        let updated = directory
            .update_role_assignment_condition(&assignment, &delegation_condition())
            .await
            .map_err(|e| {
                ProvisionError::remote(
                    format!("add delegation condition to '{}'", assignment.name),
                    e,
                )
            })?;
        results.push(EnforcedAssignment {
            assignment: updated,
            outcome: Outcome::Updated,
            detail: "delegation condition added".to_string(),
        });
    }
    Ok(results)
}
