//! Database models.

use diesel::prelude::*;

use crate::schema::{devices, keychain_items, payload_refs, profiles};

/// Device record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = devices, primary_key(udid))]
pub struct DeviceRow {
    pub udid: String,
    pub serial: String,
    pub computer_name: String,
    pub mdm_profile_identifier: Option<String>,
    pub mdm_identity_keychain_uuid: Option<String>,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// New device for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub udid: &'a str,
    pub serial: &'a str,
    pub computer_name: &'a str,
    pub mdm_profile_identifier: Option<&'a str>,
    pub mdm_identity_keychain_uuid: Option<&'a str>,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// Installed profile record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = profiles, primary_key(device_udid, profile_id))]
pub struct ProfileRow {
    pub device_udid: String,
    pub profile_id: String,
    pub profile_uuid: String,
    pub raw: Vec<u8>,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// New installed profile for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile<'a> {
    pub device_udid: &'a str,
    pub profile_id: &'a str,
    pub profile_uuid: &'a str,
    pub raw: &'a [u8],
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// Payload bookkeeping ref record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(
    table_name = payload_refs,
    primary_key(device_udid, profile_id, payload_identifier, payload_uuid, ref_key)
)]
pub struct PayloadRefRow {
    pub device_udid: String,
    pub profile_id: String,
    pub payload_identifier: String,
    pub payload_uuid: String,
    pub ref_key: String,
    pub value: String,
    pub created_at: chrono::NaiveDateTime,
}

/// New payload ref for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payload_refs)]
pub struct NewPayloadRef<'a> {
    pub device_udid: &'a str,
    pub profile_id: &'a str,
    pub payload_identifier: &'a str,
    pub payload_uuid: &'a str,
    pub ref_key: &'a str,
    pub value: &'a str,
    pub created_at: chrono::NaiveDateTime,
}

/// Keychain item record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = keychain_items, primary_key(device_udid, uuid))]
pub struct KeychainItemRow {
    pub device_udid: String,
    pub uuid: String,
    pub item_class: String,
    pub key_der: Option<Vec<u8>>,
    pub cert_der: Option<Vec<u8>>,
    pub identity_key_uuid: Option<String>,
    pub identity_cert_uuid: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

/// New keychain item for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = keychain_items)]
pub struct NewKeychainItemRow<'a> {
    pub device_udid: &'a str,
    pub uuid: &'a str,
    pub item_class: &'a str,
    pub key_der: Option<&'a [u8]>,
    pub cert_der: Option<&'a [u8]>,
    pub identity_key_uuid: Option<&'a str>,
    pub identity_cert_uuid: Option<&'a str>,
    pub created_at: chrono::NaiveDateTime,
}
