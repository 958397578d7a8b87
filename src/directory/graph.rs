//! Microsoft Graph and Azure Resource Manager backend.
//!
//! [`GraphDirectory`] implements [`DirectoryProvider`] over the public REST
//! APIs. It is handed ready-made bearer tokens; acquiring and refreshing them
//! is the operator's business.
//!
//! Graph `$filter` equality on `displayName` is case-insensitive, so every
//! lookup re-filters the returned records with an exact comparison.

use crate::directory::{
    AccessPackageRecord, AuthMethodTargets, AuthStrengthRecord, CatalogRecord,
    ConditionalAccessRecord, DirectoryError, DirectoryProvider, GroupRecord, NewAccessPackage,
    NewGroup, NewRoleAssignment, NewUser, PimRegistration, PolicyRecord, RoleAssignmentRecord,
    UserRecord, last_segment,
};
use crate::model::{ApprovalStage, ConditionalAccessSpec, MembershipType, PolicySpec, PolicyState};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::{debug, trace};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

const ARM_ROLE_ASSIGNMENT_API: &str = "2022-04-01";
const ABAC_CONDITION_VERSION: &str = "2.0";

/// Base URLs of the remote services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEndpoints {
    pub graph: String,
    pub graph_beta: String,
    pub arm: String,
}

impl Default for GraphEndpoints {
    fn default() -> Self {
        Self {
            graph: "https://graph.microsoft.com/v1.0".to_string(),
            graph_beta: "https://graph.microsoft.com/beta".to_string(),
            arm: "https://management.azure.com".to_string(),
        }
    }
}

/// Directory backend over Microsoft Graph and ARM.
pub struct GraphDirectory {
    client: reqwest::Client,
    endpoints: GraphEndpoints,
    graph_token: String,
    arm_token: String,
    scope_override: Option<Vec<String>>,
}

impl GraphDirectory {
    pub fn new(endpoints: GraphEndpoints, graph_token: String, arm_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            graph_token,
            arm_token,
            scope_override: None,
        }
    }

    /// Report these scopes instead of the ones carried by the Graph token.
    pub fn with_granted_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scope_override = Some(scopes);
        self
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.graph, path)
    }

    fn entitlement_url(&self, path: &str) -> String {
        self.graph_url(&format!("/identityGovernance/entitlementManagement{}", path))
    }

    async fn send(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        token: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), DirectoryError> {
        debug!("{} {} ({})", method, url, operation);
        if let Some(body) = body {
            trace!("Request body: {}", body);
        }

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DirectoryError::Transport {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DirectoryError::Transport {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, value))
    }

    /// Send and turn any non-success status into an error.
    async fn call(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        token: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, DirectoryError> {
        let (status, value) = self.send(operation, method, url, token, query, body).await?;
        if status.is_success() {
            Ok(value)
        } else {
            Err(error_from_response(operation, status, &value))
        }
    }

    async fn graph_get_all(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, DirectoryError> {
        let mut items = Vec::new();
        let mut page = self
            .call(operation, Method::GET, url, &self.graph_token, query, None)
            .await?;
        loop {
            if let Some(values) = page.get("value").and_then(Value::as_array) {
                items.extend(values.iter().cloned());
            }
            let Some(next) = page.get("@odata.nextLink").and_then(Value::as_str) else {
                break;
            };
            let next = next.to_string();
            page = self
                .call(operation, Method::GET, &next, &self.graph_token, &[], None)
                .await?;
        }
        Ok(items)
    }

    async fn graph_find_by_name(
        &self,
        operation: &str,
        path: &str,
        display_name: &str,
    ) -> Result<Vec<Value>, DirectoryError> {
        let url = self.graph_url(path);
        let filter = format!("displayName eq '{}'", odata_quote(display_name));
        let items = self
            .graph_get_all(operation, &url, &[("$filter", filter)])
            .await?;
        Ok(items
            .into_iter()
            .filter(|item| item.get("displayName").and_then(Value::as_str) == Some(display_name))
            .collect())
    }

    fn role_assignment_url(&self, scope: &str, name: &str) -> String {
        format!(
            "{}{}/providers/Microsoft.Authorization/roleAssignments/{}",
            self.endpoints.arm, scope, name
        )
    }

    async fn put_role_assignment(
        &self,
        operation: &str,
        name: &str,
        assignment: &NewRoleAssignment,
    ) -> Result<RoleAssignmentRecord, DirectoryError> {
        let mut properties = json!({
            "roleDefinitionId": format!(
                "{}/providers/Microsoft.Authorization/roleDefinitions/{}",
                assignment.scope, assignment.role_definition_id
            ),
            "principalId": assignment.principal_id,
            "principalType": "Group",
        });
        if let Some(condition) = &assignment.condition {
            properties["condition"] = json!(condition);
            properties["conditionVersion"] = json!(ABAC_CONDITION_VERSION);
        }
        let body = json!({ "properties": properties });
        let url = self.role_assignment_url(&assignment.scope, name);
        let value = self
            .call(
                operation,
                Method::PUT,
                &url,
                &self.arm_token,
                &[("api-version", ARM_ROLE_ASSIGNMENT_API.to_string())],
                Some(&body),
            )
            .await?;
        parse_role_assignment(operation, &value)
    }
}

/// Escape a literal for an OData `$filter` string.
fn odata_quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn error_from_response(operation: &str, status: StatusCode, body: &Value) -> DirectoryError {
    if status == StatusCode::FORBIDDEN {
        return DirectoryError::PermissionDenied {
            operation: operation.to_string(),
        };
    }
    let error = body.get("error").unwrap_or(body);
    DirectoryError::Http {
        operation: operation.to_string(),
        status: status.as_u16(),
        code: error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no error message")
            .to_string(),
    }
}

fn str_field(operation: &str, value: &Value, field: &str) -> Result<String, DirectoryError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DirectoryError::invalid_response(operation, format!("missing '{}'", field)))
}

fn parse_group(operation: &str, value: &Value) -> Result<GroupRecord, DirectoryError> {
    Ok(GroupRecord {
        id: str_field(operation, value, "id")?,
        display_name: str_field(operation, value, "displayName")?,
        description: value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        role_assignable: value
            .get("isAssignableToRole")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_user(operation: &str, value: &Value) -> Result<UserRecord, DirectoryError> {
    Ok(UserRecord {
        id: str_field(operation, value, "id")?,
        user_principal_name: str_field(operation, value, "userPrincipalName")?,
        display_name: value
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        account_enabled: value
            .get("accountEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        employee_id: value
            .get("employeeId")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_role_assignment(operation: &str, value: &Value) -> Result<RoleAssignmentRecord, DirectoryError> {
    let properties = value
        .get("properties")
        .ok_or_else(|| DirectoryError::invalid_response(operation, "missing 'properties'"))?;
    let id = str_field(operation, value, "id")?;
    Ok(RoleAssignmentRecord {
        name: last_segment(&id).to_string(),
        id,
        principal_id: str_field(operation, properties, "principalId")?,
        role_definition_id: last_segment(&str_field(operation, properties, "roleDefinitionId")?)
            .to_string(),
        scope: str_field(operation, properties, "scope")?,
        condition: properties
            .get("condition")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_policy_state(value: &Value) -> PolicyState {
    match value.get("state").and_then(Value::as_str) {
        Some("enabled") => PolicyState::Enforced,
        Some("disabled") => PolicyState::Disabled,
        _ => PolicyState::ReportOnly,
    }
}

/// Resource-role origin id for a group membership type.
fn role_origin_id(group_id: &str, membership: MembershipType) -> String {
    match membership {
        MembershipType::Member => format!("Member_{}", group_id),
        MembershipType::EligibleMember => format!("Eligible_Member_{}", group_id),
    }
}

fn membership_from_origin_id(origin_id: &str) -> Option<MembershipType> {
    if origin_id.starts_with("Eligible_Member_") {
        Some(MembershipType::EligibleMember)
    } else if origin_id.starts_with("Member_") {
        Some(MembershipType::Member)
    } else {
        None
    }
}

/// Assignment policy body for one [`PolicySpec`].
fn policy_body(access_package_id: &str, policy: &PolicySpec) -> Value {
    let stages: Vec<Value> = policy
        .approval_stages
        .iter()
        .map(|stage| {
            let approvers = match stage {
                ApprovalStage::Manager => json!([{
                    "@odata.type": "#microsoft.graph.requestorManager",
                    "managerLevel": 1
                }]),
                ApprovalStage::Team { group_id } => json!([{
                    "@odata.type": "#microsoft.graph.groupMembers",
                    "groupId": group_id
                }]),
            };
            json!({
                "durationBeforeAutomaticDenial": "P14D",
                "isApproverJustificationRequired": true,
                "isEscalationEnabled": false,
                "primaryApprovers": approvers,
                "fallbackPrimaryApprovers": [],
                "escalationApprovers": [],
                "fallbackEscalationApprovers": []
            })
        })
        .collect();

    json!({
        "displayName": policy.name,
        "description": format!("{} via {}", policy.duration, policy.membership.as_str()),
        "allowedTargetScope": "allMemberUsers",
        "accessPackage": { "id": access_package_id },
        "expiration": {
            "type": "afterDuration",
            "duration": policy.duration.iso8601()
        },
        "requestorSettings": {
            "enableTargetsToSelfAddAccess": true,
            "enableTargetsToSelfUpdateAccess": policy.extensible,
            "enableTargetsToSelfRemoveAccess": true,
            "allowCustomAssignmentSchedule": false
        },
        "requestApprovalSettings": {
            "isApprovalRequiredForAdd": true,
            "isApprovalRequiredForUpdate": policy.extensible,
            "stages": stages
        }
    })
}

/// Existing include targets verbatim, followed by any group not yet listed.
fn merged_include_targets(current: &Value, group_ids: &[String]) -> Vec<Value> {
    let mut targets = current
        .get("includeTargets")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for id in group_ids {
        let present = targets
            .iter()
            .any(|t| t.get("id").and_then(Value::as_str) == Some(id.as_str()));
        if !present {
            targets.push(json!({ "targetType": "group", "id": id, "isRegistrationRequired": false }));
        }
    }
    targets
}

fn token_claims(token: &str) -> Result<Value, DirectoryError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| DirectoryError::invalid_response("read token", "not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| DirectoryError::invalid_response("read token", e.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DirectoryError::invalid_response("read token", e.to_string()))
}

/// Scopes carried by a bearer token (`scp` and `roles` claims).
pub fn scopes_from_token(token: &str) -> Result<Vec<String>, DirectoryError> {
    let claims = token_claims(token)?;
    let mut scopes: Vec<String> = claims
        .get("scp")
        .and_then(Value::as_str)
        .map(|scp| scp.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(roles) = claims.get("roles").and_then(Value::as_array) {
        scopes.extend(roles.iter().filter_map(Value::as_str).map(str::to_string));
    }
    Ok(scopes)
}

/// Tenant a bearer token was issued for (`tid` claim).
pub fn tenant_from_token(token: &str) -> Result<Option<String>, DirectoryError> {
    Ok(token_claims(token)?
        .get("tid")
        .and_then(Value::as_str)
        .map(str::to_string))
}

impl DirectoryProvider for GraphDirectory {
    async fn granted_scopes(&self) -> Result<Vec<String>, DirectoryError> {
        match &self.scope_override {
            Some(scopes) => Ok(scopes.clone()),
            None => scopes_from_token(&self.graph_token),
        }
    }

    async fn find_groups_by_name(&self, display_name: &str) -> Result<Vec<GroupRecord>, DirectoryError> {
        let op = "find groups";
        self.graph_find_by_name(op, "/groups", display_name)
            .await?
            .iter()
            .map(|v| parse_group(op, v))
            .collect()
    }

    async fn create_group(&self, group: NewGroup) -> Result<GroupRecord, DirectoryError> {
        let op = "create group";
        let body = json!({
            "displayName": group.display_name,
            "description": group.description,
            "mailEnabled": false,
            "mailNickname": group.mail_nickname(),
            "securityEnabled": true,
            "isAssignableToRole": group.role_assignable,
        });
        let value = self
            .call(op, Method::POST, &self.graph_url("/groups"), &self.graph_token, &[], Some(&body))
            .await?;
        parse_group(op, &value)
    }

    async fn register_group_for_pim(&self, group_id: &str) -> Result<PimRegistration, DirectoryError> {
        let op = "register group for PIM";
        let url = format!(
            "{}/privilegedAccess/aadGroups/resources/register",
            self.endpoints.graph_beta
        );
        let body = json!({ "externalId": group_id });
        let (status, value) = self
            .send(op, Method::POST, &url, &self.graph_token, &[], Some(&body))
            .await?;
        if status.is_success() {
            return Ok(PimRegistration::Registered);
        }
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if status == StatusCode::BAD_REQUEST
            && (message.contains("already onboarded") || message.contains("already registered"))
        {
            Ok(PimRegistration::AlreadyRegistered)
        } else {
            Err(error_from_response(op, status, &value))
        }
    }

    async fn list_group_member_ids(&self, group_id: &str) -> Result<Vec<String>, DirectoryError> {
        let op = "list group members";
        let url = self.graph_url(&format!("/groups/{}/members", group_id));
        let items = self
            .graph_get_all(op, &url, &[("$select", "id".to_string())])
            .await?;
        items.iter().map(|v| str_field(op, v, "id")).collect()
    }

    async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<bool, DirectoryError> {
        let op = "add group member";
        let url = self.graph_url(&format!("/groups/{}/members/$ref", group_id));
        let body = json!({
            "@odata.id": self.graph_url(&format!("/directoryObjects/{}", user_id))
        });
        let (status, value) = self
            .send(op, Method::POST, &url, &self.graph_token, &[], Some(&body))
            .await?;
        if status.is_success() {
            return Ok(true);
        }
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && message.contains("already exist") {
            Ok(false)
        } else {
            Err(error_from_response(op, status, &value))
        }
    }

    async fn find_catalogs_by_name(&self, display_name: &str) -> Result<Vec<CatalogRecord>, DirectoryError> {
        let op = "find catalogs";
        self.graph_find_by_name(
            op,
            "/identityGovernance/entitlementManagement/catalogs",
            display_name,
        )
        .await?
        .iter()
        .map(|v| -> Result<CatalogRecord, DirectoryError> {
            Ok(CatalogRecord {
                id: str_field(op, v, "id")?,
                display_name: str_field(op, v, "displayName")?,
            })
        })
        .collect()
    }

    async fn create_catalog(&self, display_name: &str, description: &str) -> Result<CatalogRecord, DirectoryError> {
        let op = "create catalog";
        let body = json!({
            "displayName": display_name,
            "description": description,
            "isExternallyVisible": false,
        });
        let value = self
            .call(op, Method::POST, &self.entitlement_url("/catalogs"), &self.graph_token, &[], Some(&body))
            .await?;
        Ok(CatalogRecord {
            id: str_field(op, &value, "id")?,
            display_name: str_field(op, &value, "displayName")?,
        })
    }

    async fn catalog_has_group(&self, catalog_id: &str, group_id: &str) -> Result<bool, DirectoryError> {
        let url = self.entitlement_url(&format!("/catalogs/{}/resources", catalog_id));
        let filter = format!("originId eq '{}'", odata_quote(group_id));
        let items = self
            .graph_get_all("list catalog resources", &url, &[("$filter", filter)])
            .await?;
        Ok(!items.is_empty())
    }

    async fn add_group_to_catalog(&self, catalog_id: &str, group_id: &str) -> Result<(), DirectoryError> {
        let body = json!({
            "requestType": "adminAdd",
            "resource": { "originId": group_id, "originSystem": "AadGroup" },
            "catalog": { "id": catalog_id },
        });
        self.call(
            "add group to catalog",
            Method::POST,
            &self.entitlement_url("/resourceRequests"),
            &self.graph_token,
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn find_access_packages_by_name(
        &self,
        catalog_id: &str,
        display_name: &str,
    ) -> Result<Vec<AccessPackageRecord>, DirectoryError> {
        let op = "find access packages";
        let url = self.entitlement_url("/accessPackages");
        let filter = format!("displayName eq '{}'", odata_quote(display_name));
        let items = self
            .graph_get_all(op, &url, &[("$filter", filter), ("$expand", "catalog".to_string())])
            .await?;
        let mut packages = Vec::new();
        for item in items {
            let package_catalog = item
                .get("catalog")
                .and_then(|c| c.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if package_catalog != catalog_id
                || item.get("displayName").and_then(Value::as_str) != Some(display_name)
            {
                continue;
            }
            packages.push(AccessPackageRecord {
                id: str_field(op, &item, "id")?,
                display_name: display_name.to_string(),
                catalog_id: catalog_id.to_string(),
            });
        }
        Ok(packages)
    }

    async fn create_access_package(&self, package: NewAccessPackage) -> Result<AccessPackageRecord, DirectoryError> {
        let op = "create access package";
        let body = json!({
            "displayName": package.display_name,
            "description": package.description,
            "isHidden": false,
            "catalog": { "id": package.catalog_id },
        });
        let value = self
            .call(op, Method::POST, &self.entitlement_url("/accessPackages"), &self.graph_token, &[], Some(&body))
            .await?;
        Ok(AccessPackageRecord {
            id: str_field(op, &value, "id")?,
            display_name: package.display_name,
            catalog_id: package.catalog_id,
        })
    }

    async fn package_role_scopes(
        &self,
        access_package_id: &str,
        group_id: &str,
    ) -> Result<Vec<MembershipType>, DirectoryError> {
        let url = self.entitlement_url(&format!("/accessPackages/{}", access_package_id));
        let value = self
            .call(
                "list package role scopes",
                Method::GET,
                &url,
                &self.graph_token,
                &[("$expand", "resourceRoleScopes($expand=role,scope)".to_string())],
                None,
            )
            .await?;
        let scopes = value
            .get("resourceRoleScopes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(scopes
            .iter()
            .filter(|s| {
                s.get("scope")
                    .and_then(|scope| scope.get("originId"))
                    .and_then(Value::as_str)
                    == Some(group_id)
            })
            .filter_map(|s| {
                s.get("role")
                    .and_then(|role| role.get("originId"))
                    .and_then(Value::as_str)
                    .and_then(membership_from_origin_id)
            })
            .collect())
    }

    async fn add_package_role_scope(
        &self,
        access_package_id: &str,
        _catalog_id: &str,
        group_id: &str,
        membership: MembershipType,
    ) -> Result<(), DirectoryError> {
        let url = self.entitlement_url(&format!(
            "/accessPackages/{}/resourceRoleScopes",
            access_package_id
        ));
        let body = json!({
            "role": {
                "originId": role_origin_id(group_id, membership),
                "displayName": membership.as_str(),
                "originSystem": "AadGroup",
                "resource": { "originId": group_id, "originSystem": "AadGroup" }
            },
            "scope": { "originId": group_id, "originSystem": "AadGroup" }
        });
        self.call("add package role scope", Method::POST, &url, &self.graph_token, &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn find_policies_by_name(
        &self,
        access_package_id: &str,
        display_name: &str,
    ) -> Result<Vec<PolicyRecord>, DirectoryError> {
        let op = "find assignment policies";
        let url = self.entitlement_url("/assignmentPolicies");
        let filter = format!("accessPackage/id eq '{}'", odata_quote(access_package_id));
        let items = self.graph_get_all(op, &url, &[("$filter", filter)]).await?;
        items
            .iter()
            .filter(|v| v.get("displayName").and_then(Value::as_str) == Some(display_name))
            .map(|v| -> Result<PolicyRecord, DirectoryError> {
                Ok(PolicyRecord {
                    id: str_field(op, v, "id")?,
                    display_name: display_name.to_string(),
                    access_package_id: access_package_id.to_string(),
                })
            })
            .collect()
    }

    async fn create_policy(&self, access_package_id: &str, policy: &PolicySpec) -> Result<PolicyRecord, DirectoryError> {
        let op = "create assignment policy";
        let body = policy_body(access_package_id, policy);
        let value = self
            .call(op, Method::POST, &self.entitlement_url("/assignmentPolicies"), &self.graph_token, &[], Some(&body))
            .await?;
        Ok(PolicyRecord {
            id: str_field(op, &value, "id")?,
            display_name: policy.name.clone(),
            access_package_id: access_package_id.to_string(),
        })
    }

    async fn list_role_assignments(
        &self,
        principal_id: &str,
        role_definition_id: &str,
        scope: &str,
    ) -> Result<Vec<RoleAssignmentRecord>, DirectoryError> {
        let op = "list role assignments";
        let url = format!(
            "{}{}/providers/Microsoft.Authorization/roleAssignments",
            self.endpoints.arm, scope
        );
        let query = [
            ("api-version", ARM_ROLE_ASSIGNMENT_API.to_string()),
            ("$filter", format!("principalId eq '{}'", principal_id)),
        ];
        let value = self
            .call(op, Method::GET, &url, &self.arm_token, &query, None)
            .await?;
        let items = value
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut assignments = Vec::new();
        for item in &items {
            let record = parse_role_assignment(op, item)?;
            if record.role_definition_id.eq_ignore_ascii_case(role_definition_id)
                && record.scope.eq_ignore_ascii_case(scope)
            {
                assignments.push(record);
            }
        }
        Ok(assignments)
    }

    async fn create_role_assignment(&self, assignment: NewRoleAssignment) -> Result<RoleAssignmentRecord, DirectoryError> {
        let name = Uuid::new_v4().to_string();
        self.put_role_assignment("create role assignment", &name, &assignment)
            .await
    }

    async fn update_role_assignment_condition(
        &self,
        assignment: &RoleAssignmentRecord,
        condition: &str,
    ) -> Result<RoleAssignmentRecord, DirectoryError> {
        let desired = NewRoleAssignment {
            principal_id: assignment.principal_id.clone(),
            role_definition_id: assignment.role_definition_id.clone(),
            scope: assignment.scope.clone(),
            condition: Some(condition.to_string()),
        };
        self.put_role_assignment("update role assignment condition", &assignment.name, &desired)
            .await
    }

    async fn find_authentication_strengths(
        &self,
        display_name: &str,
    ) -> Result<Vec<AuthStrengthRecord>, DirectoryError> {
        let op = "find authentication strengths";
        self.graph_find_by_name(op, "/policies/authenticationStrengthPolicies", display_name)
            .await?
            .iter()
            .map(|v| -> Result<AuthStrengthRecord, DirectoryError> {
                Ok(AuthStrengthRecord {
                    id: str_field(op, v, "id")?,
                    display_name: str_field(op, v, "displayName")?,
                })
            })
            .collect()
    }

    async fn find_conditional_access_policies(
        &self,
        display_name: &str,
    ) -> Result<Vec<ConditionalAccessRecord>, DirectoryError> {
        let op = "find conditional access policies";
        self.graph_find_by_name(op, "/identity/conditionalAccess/policies", display_name)
            .await?
            .iter()
            .map(|v| -> Result<ConditionalAccessRecord, DirectoryError> {
                Ok(ConditionalAccessRecord {
                    id: str_field(op, v, "id")?,
                    display_name: str_field(op, v, "displayName")?,
                    state: parse_policy_state(v),
                })
            })
            .collect()
    }

    async fn create_conditional_access_policy(
        &self,
        policy: &ConditionalAccessSpec,
    ) -> Result<ConditionalAccessRecord, DirectoryError> {
        let op = "create conditional access policy";
        let body = json!({
            "displayName": policy.name,
            "state": policy.state.as_str(),
            "conditions": {
                "users": { "includeGroups": [policy.group_id] },
                "applications": { "includeApplications": ["All"] },
                "platforms": { "includePlatforms": [policy.platform.device_platform()] },
                "clientAppTypes": ["all"]
            },
            "grantControls": {
                "operator": "AND",
                "authenticationStrength": { "id": policy.authentication_strength_id }
            }
        });
        let value = self
            .call(
                op,
                Method::POST,
                &self.graph_url("/identity/conditionalAccess/policies"),
                &self.graph_token,
                &[],
                Some(&body),
            )
            .await?;
        Ok(ConditionalAccessRecord {
            id: str_field(op, &value, "id")?,
            display_name: policy.name.clone(),
            state: parse_policy_state(&value),
        })
    }

    async fn passkey_method_targets(&self) -> Result<AuthMethodTargets, DirectoryError> {
        let url = self.graph_url(
            "/policies/authenticationMethodsPolicy/authenticationMethodConfigurations/fido2",
        );
        let value = self
            .call("read passkey method", Method::GET, &url, &self.graph_token, &[], None)
            .await?;
        let include_group_ids = value
            .get("includeTargets")
            .and_then(Value::as_array)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| t.get("targetType").and_then(Value::as_str) == Some("group"))
                    .filter_map(|t| t.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(AuthMethodTargets {
            state: value
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("disabled")
                .to_string(),
            include_group_ids,
        })
    }

    async fn add_passkey_method_targets(&self, group_ids: &[String]) -> Result<(), DirectoryError> {
        let url = self.graph_url(
            "/policies/authenticationMethodsPolicy/authenticationMethodConfigurations/fido2",
        );
        let current = self
            .call("read passkey method", Method::GET, &url, &self.graph_token, &[], None)
            .await?;
        let body = json!({
            "@odata.type": "#microsoft.graph.fido2AuthenticationMethodConfiguration",
            "includeTargets": merged_include_targets(&current, group_ids),
        });
        self.call("update passkey method", Method::PATCH, &url, &self.graph_token, &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn find_user_by_upn(&self, user_principal_name: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let op = "find user";
        let filter = format!("userPrincipalName eq '{}'", odata_quote(user_principal_name));
        let items = self
            .graph_get_all(
                op,
                &self.graph_url("/users"),
                &[
                    ("$filter", filter),
                    (
                        "$select",
                        "id,userPrincipalName,displayName,accountEnabled,employeeId".to_string(),
                    ),
                ],
            )
            .await?;
        items.first().map(|v| parse_user(op, v)).transpose()
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let op = "create user";
        let nickname = user
            .user_principal_name
            .split('@')
            .next()
            .unwrap_or(&user.user_principal_name)
            .to_string();
        let mut body = json!({
            "accountEnabled": user.account_enabled,
            "displayName": user.display_name,
            "mailNickname": nickname,
            "userPrincipalName": user.user_principal_name,
            "employeeId": user.employee_id,
            "passwordProfile": {
                "forceChangePasswordNextSignIn": true,
                "password": format!("{}!Aa1", Uuid::new_v4().simple())
            }
        });
        if let Some(hire_date) = user.hire_date {
            body["employeeHireDate"] = json!(hire_date.to_rfc3339());
        }
        let value = self
            .call(op, Method::POST, &self.graph_url("/users"), &self.graph_token, &[], Some(&body))
            .await?;
        parse_user(op, &value)
    }

    async fn set_account_enabled(&self, user_id: &str, enabled: bool) -> Result<(), DirectoryError> {
        let body = json!({ "accountEnabled": enabled });
        self.call(
            "update user",
            Method::PATCH,
            &self.graph_url(&format!("/users/{}", user_id)),
            &self.graph_token,
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccessDuration;

    fn token_with(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn test_scopes_from_delegated_token() {
        let token = token_with(&json!({"scp": "Group.ReadWrite.All User.Read"}));
        assert_eq!(
            scopes_from_token(&token).unwrap(),
            vec!["Group.ReadWrite.All", "User.Read"]
        );
    }

    #[test]
    fn test_scopes_from_application_token() {
        let token = token_with(&json!({"roles": ["Policy.Read.All"]}));
        assert_eq!(scopes_from_token(&token).unwrap(), vec!["Policy.Read.All"]);
    }

    #[test]
    fn test_merged_targets_keep_existing_settings() {
        let current = json!({
            "includeTargets": [
                { "targetType": "group", "id": "g1", "isRegistrationRequired": true },
                { "targetType": "group", "id": "all_users", "isRegistrationRequired": false }
            ]
        });
        let merged = merged_include_targets(&current, &["g1".to_string(), "g2".to_string()]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0]["isRegistrationRequired"], true);
        assert_eq!(merged[1]["id"], "all_users");
        assert_eq!(merged[2]["id"], "g2");
        assert_eq!(merged[2]["isRegistrationRequired"], false);

        assert_eq!(merged_include_targets(&Value::Null, &["g3".to_string()]).len(), 1);
    }

    #[test]
    fn test_tenant_from_token() {
        let token = token_with(&json!({"tid": "t1", "scp": "User.Read"}));
        assert_eq!(tenant_from_token(&token).unwrap().as_deref(), Some("t1"));
        let no_tenant = token_with(&json!({"scp": "User.Read"}));
        assert_eq!(tenant_from_token(&no_tenant).unwrap(), None);
    }

    #[test]
    fn test_scopes_from_garbage_token() {
        assert!(scopes_from_token("not-a-token").is_err());
    }

    #[test]
    fn test_odata_quote() {
        assert_eq!(odata_quote("O'Brien"), "O''Brien");
    }

    #[test]
    fn test_role_origin_ids() {
        assert_eq!(role_origin_id("g1", MembershipType::Member), "Member_g1");
        assert_eq!(
            membership_from_origin_id(&role_origin_id("g1", MembershipType::EligibleMember)),
            Some(MembershipType::EligibleMember)
        );
        assert_eq!(membership_from_origin_id("Owner_g1"), None);
    }

    #[test]
    fn test_parse_role_assignment_strips_definition_path() {
        let value = json!({
            "id": "/subscriptions/s1/providers/Microsoft.Authorization/roleAssignments/ra1",
            "properties": {
                "principalId": "p1",
                "roleDefinitionId": "/subscriptions/s1/providers/Microsoft.Authorization/roleDefinitions/8e3af657-a8ff-443c-a75c-2fe8c4bcb635",
                "scope": "/subscriptions/s1",
                "condition": null
            }
        });
        let record = parse_role_assignment("test", &value).unwrap();
        assert_eq!(record.name, "ra1");
        assert_eq!(record.role_definition_id, "8e3af657-a8ff-443c-a75c-2fe8c4bcb635");
        assert_eq!(record.condition, None);
    }

    #[test]
    fn test_error_from_response() {
        let body = json!({"error": {"code": "Request_BadRequest", "message": "bad"}});
        let err = error_from_response("create group", StatusCode::BAD_REQUEST, &body);
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("Request_BadRequest"));

        let forbidden = error_from_response("create group", StatusCode::FORBIDDEN, &Value::Null);
        assert!(matches!(forbidden, DirectoryError::PermissionDenied { .. }));
    }

    #[test]
    fn test_policy_body_stages_and_extension() {
        let policy = PolicySpec {
            name: "Admins - 1 month".to_string(),
            duration: AccessDuration::Months(1),
            membership: MembershipType::Member,
            approval_stages: vec![
                ApprovalStage::Manager,
                ApprovalStage::Team {
                    group_id: "team".to_string(),
                },
            ],
            extensible: false,
        };
        let body = policy_body("ap1", &policy);
        assert_eq!(body["expiration"]["duration"], "P1M");
        assert_eq!(body["requestorSettings"]["enableTargetsToSelfUpdateAccess"], false);
        let stages = body["requestApprovalSettings"]["stages"].as_array().unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1]["primaryApprovers"][0]["groupId"], "team");
    }
}
