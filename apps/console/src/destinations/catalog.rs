use crate::destinations::codec::{Layout, StorjAuth};
use crate::destinations::field::{FieldSpec, FieldType};
use serde::Serialize;
use std::sync::OnceLock;

/// One entry of the destination catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationType {
    /// Backend key, also the URL scheme.
    pub key: String,
    /// UI-facing id when several entries share one backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_key: Option<String>,
    pub display_name: String,
    pub description: String,
    #[serde(skip)]
    pub layout: Layout,
    pub custom: Vec<FieldSpec>,
    pub dynamic: Vec<FieldSpec>,
    /// Static overrides for options that stay in the advanced group.
    pub advanced: Vec<FieldSpec>,
    /// Backend options never shown for this entry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,
}

impl DestinationType {
    fn new(key: &str, display_name: &str, description: &str, layout: Layout) -> Self {
        Self {
            key: key.to_string(),
            custom_key: None,
            display_name: display_name.to_string(),
            description: description.to_string(),
            layout,
            custom: Vec::new(),
            dynamic: Vec::new(),
            advanced: Vec::new(),
            ignored: Vec::new(),
        }
    }

    /// Entry for a key nobody declared: no custom fields, query passed through.
    pub fn fallback(key: &str) -> Self {
        Self::new(key, key, "", Layout::Passthrough)
            .custom(vec![FieldSpec::new("path").kind(FieldType::Path).label("Path")])
    }

    fn custom_key(mut self, custom_key: &str) -> Self {
        self.custom_key = Some(custom_key.to_string());
        self
    }

    fn custom(mut self, fields: Vec<FieldSpec>) -> Self {
        self.custom = fields;
        self
    }

    fn dynamic(mut self, fields: Vec<FieldSpec>) -> Self {
        self.dynamic = fields;
        self
    }

    fn advanced(mut self, fields: Vec<FieldSpec>) -> Self {
        self.advanced = fields;
        self
    }

    fn ignore(mut self, names: &[&str]) -> Self {
        self.ignored = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn id(&self) -> &str {
        self.custom_key.as_deref().unwrap_or(&self.key)
    }

    pub fn dynamic_field(&self, name: &str) -> Option<&FieldSpec> {
        self.dynamic.iter().find(|spec| spec.answers_to(name))
    }

    pub fn advanced_field(&self, name: &str) -> Option<&FieldSpec> {
        self.advanced.iter().find(|spec| spec.answers_to(name))
    }

    pub fn custom_field(&self, name: &str) -> Option<&FieldSpec> {
        self.custom.iter().find(|spec| spec.answers_to(name))
    }

    pub fn is_ignored(&self, spec: &FieldSpec) -> bool {
        self.ignored.iter().any(|name| spec.answers_to(name))
    }

    /// True when a URL with this scheme may belong to the entry.
    pub fn claims_scheme(&self, scheme: &str) -> bool {
        if self.key.eq_ignore_ascii_case(scheme) {
            return true;
        }
        matches!(self.layout, Layout::ServerPath { ssl_toggle: true })
            && scheme.len() == self.key.len() + 1
            && scheme
                .get(..self.key.len())
                .map(|base| base.eq_ignore_ascii_case(&self.key))
                .unwrap_or(false)
            && scheme.ends_with(['s', 'S'])
    }
}

pub fn catalog() -> &'static [DestinationType] {
    static CATALOG: OnceLock<Vec<DestinationType>> = OnceLock::new();
    CATALOG.get_or_init(build)
}

/// Lookup by UI id first, then by backend key.
pub fn find(id: &str) -> Option<&'static DestinationType> {
    let entries = catalog();
    entries
        .iter()
        .find(|entry| entry.custom_key.as_deref() == Some(id))
        .or_else(|| entries.iter().find(|entry| entry.key == id))
}

/// Entries that could have produced a URL with `scheme`, in catalog order.
pub fn for_scheme(scheme: &str) -> Vec<&'static DestinationType> {
    catalog()
        .iter()
        .filter(|entry| entry.claims_scheme(scheme))
        .collect()
}

fn text(name: &str, label: &str) -> FieldSpec {
    FieldSpec::new(name).kind(FieldType::String).label(label)
}

fn secret(name: &str, label: &str) -> FieldSpec {
    FieldSpec::new(name).kind(FieldType::Password).label(label)
}

fn toggle(name: &str, label: &str) -> FieldSpec {
    FieldSpec::new(name).kind(FieldType::Boolean).label(label)
}

fn path_field(label: &str) -> FieldSpec {
    FieldSpec::new("path").kind(FieldType::Path).label(label)
}

fn server_fields(default_port: &str) -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("server")
            .kind(FieldType::Hostname)
            .label("Server")
            .mandatory(),
        FieldSpec::new("port")
            .kind(FieldType::Integer)
            .label("Port")
            .default_value(default_port)
            .range(1, 65535),
        path_field("Path on server"),
    ]
}

fn bucket_fields(bucket_label: &str) -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("bucket")
            .kind(FieldType::String)
            .label(bucket_label)
            .mandatory(),
        path_field("Folder path"),
    ]
}

fn credentials() -> Vec<FieldSpec> {
    vec![
        text("auth-username", "Username").order(1),
        secret("auth-password", "Password").order(2),
    ]
}

fn oauth() -> Vec<FieldSpec> {
    vec![secret("authid", "AuthID").mandatory().order(1)]
}

fn with(mut fields: Vec<FieldSpec>, extra: Vec<FieldSpec>) -> Vec<FieldSpec> {
    fields.extend(extra);
    fields
}

fn build() -> Vec<DestinationType> {
    use Layout::*;

    vec![
        DestinationType::new("file", "Local folder or drive", "A folder on this machine or an attached drive", File)
            .custom(vec![path_field("Folder path").mandatory()]),
        DestinationType::new("ftp", "FTP", "A server reachable over FTP", ServerPath { ssl_toggle: false })
            .custom(server_fields("21"))
            .dynamic(credentials())
            .advanced(vec![toggle("ftp-passive", "Use passive mode")]),
        DestinationType::new("aftp", "FTP (alternative)", "FTP through the alternative client library", ServerPath { ssl_toggle: false })
            .custom(server_fields("21"))
            .dynamic(with(
                credentials(),
                vec![FieldSpec::new("aftp-encryption-mode")
                    .kind(FieldType::Enumeration)
                    .label("Encryption mode")
                    .values(&["None", "Implicit", "Explicit", "Auto"])
                    .order(3)],
            )),
        DestinationType::new("ssh", "SFTP (SSH)", "A server reachable over SSH file transfer", ServerPath { ssl_toggle: false })
            .custom(server_fields("22"))
            .dynamic(with(
                credentials(),
                vec![
                    FieldSpec::new("ssh-keyfile").kind(FieldType::Path).label("Private key file"),
                    text("ssh-fingerprint", "Host key fingerprint"),
                ],
            ))
            .ignore(&["ssh-key"]),
        DestinationType::new("webdav", "WebDAV", "A WebDAV share", ServerPath { ssl_toggle: true })
            .custom(server_fields("443"))
            .dynamic(with(vec![toggle("use-ssl", "Use SSL").order(0)], credentials()))
            .advanced(vec![toggle("integrated-authentication", "Use Windows authentication")]),
        DestinationType::new("tahoe", "Tahoe-LAFS", "A Tahoe-LAFS grid gateway", ServerPath { ssl_toggle: true })
            .custom(server_fields("3456"))
            .dynamic(vec![toggle("use-ssl", "Use SSL").order(0)]),
        DestinationType::new("cifs", "SMB / CIFS", "A Windows or Samba network share", Share)
            .custom(vec![
                FieldSpec::new("server").kind(FieldType::Hostname).label("Server").mandatory(),
                text("share", "Share name").mandatory(),
                path_field("Path in share"),
            ])
            .dynamic(with(vec![text("auth-domain", "Domain").order(0)], credentials()))
            .advanced(vec![FieldSpec::new("transport")
                .kind(FieldType::Enumeration)
                .values(&["DirectTCP", "NetBIOS"])]),
        DestinationType::new("s3", "S3 compatible", "Amazon S3 or any S3 compatible storage", BucketPath)
            .custom(bucket_fields("Bucket name"))
            .dynamic(vec![
                FieldSpec::new("s3-server-name")
                    .kind(FieldType::Hostname)
                    .label("Server")
                    .default_value("s3.amazonaws.com")
                    .order(0),
                text("s3-location-constraint", "Bucket region"),
                text("s3-storage-class", "Storage class"),
                text("auth-username", "Access key ID").mandatory().order(1),
                secret("auth-password", "Secret access key").mandatory().order(2),
                toggle("use-ssl", "Use SSL"),
            ]),
        DestinationType::new("azure", "Azure Blob Storage", "A container in an Azure storage account", BucketPath)
            .custom(bucket_fields("Container name"))
            .dynamic(vec![
                text("azure-account-name", "Storage account name").mandatory().order(1),
                secret("azure-access-key", "Access key").order(2),
                secret("azure-access-sas-token", "SAS token").order(3),
            ])
            .ignore(&["auth-username", "auth-password"]),
        DestinationType::new("b2", "B2 Cloud Storage", "Backblaze B2", BucketPath)
            .custom(bucket_fields("Bucket name"))
            .dynamic(vec![
                text("b2-accountid", "Account ID").mandatory().order(1),
                secret("b2-applicationkey", "Application key").mandatory().order(2),
            ])
            .ignore(&["auth-username", "auth-password"]),
        DestinationType::new("gcs", "Google Cloud Storage", "A Google Cloud Storage bucket", BucketPath)
            .custom(bucket_fields("Bucket name"))
            .dynamic(with(
                oauth(),
                vec![
                    text("gcs-project", "Project"),
                    text("gcs-location", "Location"),
                    text("gcs-storage-class", "Storage class"),
                ],
            )),
        DestinationType::new("e2", "iDrive e2", "An iDrive e2 bucket", BucketPath)
            .custom(bucket_fields("Bucket name"))
            .dynamic(vec![
                text("access_key_id", "Access key ID").mandatory().order(1),
                secret("access_secret_key", "Access secret key").mandatory().order(2),
            ]),
        DestinationType::new("openstack", "OpenStack Object Storage", "Swift compatible object storage", BucketPath)
            .custom(bucket_fields("Container name"))
            .dynamic(with(
                credentials(),
                vec![
                    text("openstack-authuri", "Authentication URI").mandatory().order(0),
                    FieldSpec::new("openstack-version")
                        .kind(FieldType::Enumeration)
                        .label("Keystone API version")
                        .values(&["v2", "v3"])
                        .default_value("v2"),
                    text("openstack-tenant-name", "Tenant name"),
                    text("openstack-domain-name", "Domain name"),
                    secret("openstack-apikey", "API key"),
                    text("openstack-region", "Region"),
                ],
            )),
        DestinationType::new("cos", "Tencent COS", "Tencent Cloud Object Storage", PathOnly)
            .custom(vec![path_field("Folder path")])
            .dynamic(vec![
                text("cos-app-id", "App ID").mandatory(),
                text("cos-region", "Region").mandatory(),
                text("cos-secret-id", "Secret ID").mandatory(),
                secret("cos-secret-key", "Secret key").mandatory(),
                text("cos-bucket", "Bucket").mandatory(),
            ]),
        DestinationType::new("aliyunoss", "Alibaba Cloud OSS", "Alibaba Cloud Object Storage Service", PathOnly)
            .custom(vec![path_field("Folder path")])
            .dynamic(vec![
                FieldSpec::new("oss-endpoint").kind(FieldType::Hostname).label("Endpoint").mandatory(),
                text("oss-bucket-name", "Bucket").mandatory(),
                text("oss-access-key-id", "Access key ID").mandatory(),
                secret("oss-access-key-secret", "Access key secret").mandatory(),
            ]),
        DestinationType::new("googledrive", "Google Drive", "A folder in Google Drive", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(oauth()),
        DestinationType::new("onedrivev2", "Microsoft OneDrive", "A folder in OneDrive", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(oauth()),
        DestinationType::new("mssp", "Microsoft SharePoint", "A SharePoint document library", ServerPath { ssl_toggle: false })
            .custom(vec![
                FieldSpec::new("server").kind(FieldType::Hostname).label("Site server").mandatory(),
                FieldSpec::new("port").kind(FieldType::Integer).label("Port").range(1, 65535),
                path_field("Library path").mandatory(),
            ])
            .dynamic(with(credentials(), vec![toggle("integrated-authentication", "Use Windows authentication")])),
        DestinationType::new("msgroup", "Microsoft Group", "Files of a Microsoft 365 group", PathOnly)
            .custom(vec![path_field("Folder path")])
            .dynamic(with(oauth(), vec![text("group-email", "Group email").mandatory()])),
        DestinationType::new("dropbox", "Dropbox", "A folder in Dropbox", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(oauth()),
        DestinationType::new("box", "Box.com", "A folder in Box", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(oauth()),
        DestinationType::new("jottacloud", "Jottacloud", "A folder in Jottacloud", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(oauth())
            .advanced(vec![
                text("jottacloud-device", "Device"),
                text("jottacloud-mountpoint", "Mount point"),
            ]),
        DestinationType::new("pcloud", "pCloud", "A folder in pCloud", ServerPath { ssl_toggle: false })
            .custom(vec![
                FieldSpec::new("server")
                    .kind(FieldType::Enumeration)
                    .label("Region")
                    .values(&["api.pcloud.com", "eapi.pcloud.com"])
                    .default_value("api.pcloud.com")
                    .mandatory(),
                path_field("Folder path"),
            ])
            .dynamic(oauth()),
        DestinationType::new("mega", "Mega.nz", "A folder in Mega", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(with(credentials(), vec![secret("auth-two-factor-key", "Two-factor key")])),
        DestinationType::new("filen", "Filen", "A folder in Filen", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(with(credentials(), vec![text("two-factor-code", "Two-factor code")])),
        DestinationType::new("filejump", "FileJump", "A folder in FileJump", PathOnly)
            .custom(vec![path_field("Folder path").mandatory()])
            .dynamic(vec![secret("api-token", "API token").mandatory()]),
        DestinationType::new("sia", "Sia", "A Sia renter daemon", ServerPath { ssl_toggle: false })
            .custom(server_fields("9980"))
            .dynamic(vec![
                secret("sia-password", "API password"),
                FieldSpec::new("sia-redundancy").kind(FieldType::Decimal).label("Redundancy"),
            ]),
        DestinationType::new("rclone", "Rclone", "Any remote configured in a local rclone installation", Rclone)
            .dynamic(vec![
                text("rclone-remote-repository", "Remote repository").mandatory().order(0),
                FieldSpec::new("rclone-remote-path").kind(FieldType::Path).label("Remote path").order(1),
                text("rclone-local-repository", "Local repository").default_value("local"),
                FieldSpec::new("rclone-executable").kind(FieldType::Path).label("rclone executable"),
            ]),
        DestinationType::new("storj", "Storj (access grant)", "Storj DCS using an access grant", Storj(StorjAuth::AccessGrant))
            .custom_key("storjAccessGrant")
            .dynamic(vec![
                secret("storj-shared-access", "Access grant").mandatory().order(0),
                text("storj-bucket", "Bucket").mandatory().order(1),
                FieldSpec::new("storj-folder").kind(FieldType::Path).label("Folder").order(2),
            ])
            .ignore(&["storj-auth-method", "storj-satellite", "storj-api-key", "storj-secret"]),
        DestinationType::new("storj", "Storj (API key)", "Storj DCS using a satellite and API key", Storj(StorjAuth::ApiKey))
            .custom_key("storjApiKey")
            .dynamic(vec![
                FieldSpec::new("storj-satellite")
                    .kind(FieldType::Enumeration)
                    .label("Satellite")
                    .values(&[
                        "us1.storj.io:7777",
                        "eu1.storj.io:7777",
                        "ap1.storj.io:7777",
                    ])
                    .mandatory()
                    .order(0),
                secret("storj-api-key", "API key").mandatory().order(1),
                secret("storj-secret", "Encryption passphrase").mandatory().order(2),
                text("storj-bucket", "Bucket").mandatory().order(3),
                FieldSpec::new("storj-folder").kind(FieldType::Path).label("Folder").order(4),
            ])
            .ignore(&["storj-auth-method", "storj-shared-access"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<&str> = catalog().iter().map(DestinationType::id).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(total >= 29);
    }

    #[test]
    fn storj_variants_share_a_key() {
        let grant = find("storjAccessGrant").unwrap();
        let api = find("storjApiKey").unwrap();
        assert_eq!(grant.key, "storj");
        assert_eq!(api.key, "storj");
        assert_eq!(for_scheme("storj").len(), 2);
        assert_eq!(find("storj").unwrap().id(), "storjAccessGrant");
    }

    #[test]
    fn ssl_toggled_schemes_are_claimed() {
        let webdav = find("webdav").unwrap();
        assert!(webdav.claims_scheme("webdav"));
        assert!(webdav.claims_scheme("webdavs"));
        assert!(!find("ftp").unwrap().claims_scheme("ftps"));
        assert_eq!(for_scheme("tahoes")[0].key, "tahoe");
    }

    #[test]
    fn dynamic_lookup_honours_aliases() {
        let mut entry = DestinationType::fallback("custom");
        entry.dynamic = vec![FieldSpec::new("auth-username").alias("user")];
        assert_eq!(entry.dynamic_field("user").map(|f| f.name.as_str()), Some("auth-username"));
        assert!(entry.advanced_field("user").is_none());
    }
}
