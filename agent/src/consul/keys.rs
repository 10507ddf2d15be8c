//! Key naming convention in the coordination store

pub fn deployment_key(deployment_id: &str) -> String {
    format!("deployments/{}", deployment_id)
}

/// Report of one deployment on one instance
pub fn deployment_report_key(deployment_id: &str, instance_id: &str) -> String {
    format!("{}/nodes/{}", deployment_key(deployment_id), instance_id)
}

pub fn server_role_key(environment: &str, server_role: &str) -> String {
    format!("environments/{}/roles/{}", environment, server_role)
}

pub fn server_role_configuration_key(environment: &str, server_role: &str) -> String {
    format!("{}/configuration", server_role_key(environment, server_role))
}

/// Prefix holding the desired services of a role, one key per service
pub fn server_role_services_key(environment: &str, server_role: &str) -> String {
    format!("{}/services", server_role_key(environment, server_role))
}

fn service_version_key(environment: &str, service_name: &str, version: &str) -> String {
    format!("environments/{}/services/{}/{}", environment, service_name, version)
}

pub fn service_definition_key(environment: &str, service_name: &str, version: &str) -> String {
    format!("{}/definition", service_version_key(environment, service_name, version))
}

pub fn service_installation_key(environment: &str, service_name: &str, version: &str) -> String {
    format!("{}/installation", service_version_key(environment, service_name, version))
}

/// Deployment ids this instance refuses to retry
pub fn quarantine_key(instance_id: &str) -> String {
    format!("instances/{}/quarantine", instance_id)
}
