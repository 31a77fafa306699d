//! SQLite storage implementation.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::models::*;
use crate::schema::*;
use crate::traits::*;
use mdmsim_core::{DeviceRecord, Error, ItemClass, KeychainItem, NewKeychainItem, Result};

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

fn storage_err(err: impl std::fmt::Display) -> Error {
    Error::storage(err)
}

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database URL.
    pub fn new(database_url: &str) -> Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(storage_err)?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub fn run_migrations(&self) -> Result<()> {
        use diesel_migrations::MigrationHarness as _;

        let mut conn = self.conn()?;
        let applied = conn
            .run_pending_migrations(crate::MIGRATIONS)
            .map_err(storage_err)?;
        if !applied.is_empty() {
            tracing::debug!(applied = applied.len(), "ran pending migrations");
        }

        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool.get().map_err(storage_err)
    }
}

impl DeviceStore for SqliteStorage {
    fn save_device(&self, device: &DeviceRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let new_device = NewDevice {
            udid: &device.udid,
            serial: &device.serial,
            computer_name: &device.computer_name,
            mdm_profile_identifier: device.mdm_profile_identifier.as_deref(),
            mdm_identity_keychain_uuid: device.mdm_identity_keychain_uuid.as_deref(),
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(devices::table)
            .values(&new_device)
            .on_conflict(devices::udid)
            .do_update()
            .set((
                devices::serial.eq(&device.serial),
                devices::computer_name.eq(&device.computer_name),
                devices::mdm_profile_identifier.eq(device.mdm_profile_identifier.as_deref()),
                devices::mdm_identity_keychain_uuid
                    .eq(device.mdm_identity_keychain_uuid.as_deref()),
                devices::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .map_err(storage_err)?;

        Ok(())
    }

    fn load_device(&self, udid: &str) -> Result<DeviceRecord> {
        let mut conn = self.conn()?;

        let row: Option<DeviceRow> = devices::table
            .filter(devices::udid.eq(udid))
            .first(&mut conn)
            .optional()
            .map_err(storage_err)?;

        let row = row.ok_or_else(|| Error::not_found(format!("device {udid}")))?;
        Ok(DeviceRecord {
            udid: row.udid,
            serial: row.serial,
            computer_name: row.computer_name,
            mdm_profile_identifier: row.mdm_profile_identifier,
            mdm_identity_keychain_uuid: row.mdm_identity_keychain_uuid,
        })
    }

    fn list_device_udids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;

        devices::table
            .select(devices::udid)
            .order(devices::udid.asc())
            .load(&mut conn)
            .map_err(storage_err)
    }
}

fn item_from_row(row: KeychainItemRow) -> Result<KeychainItem> {
    let class = ItemClass::parse(&row.item_class)
        .ok_or_else(|| Error::storage(format!("unknown keychain item class {:?}", row.item_class)))?;

    match class {
        ItemClass::Key => {
            let key_der = row
                .key_der
                .ok_or_else(|| Error::storage(format!("key item {} has no key data", row.uuid)))?;
            Ok(KeychainItem::Key {
                uuid: row.uuid,
                key_der,
            })
        }
        ItemClass::Certificate => {
            let cert_der = row.cert_der.ok_or_else(|| {
                Error::storage(format!("certificate item {} has no certificate data", row.uuid))
            })?;
            Ok(KeychainItem::Certificate {
                uuid: row.uuid,
                cert_der,
            })
        }
        ItemClass::Identity => {
            let (key_uuid, certificate_uuid) =
                match (row.identity_key_uuid, row.identity_cert_uuid) {
                    (Some(key), Some(cert)) => (key, cert),
                    _ => {
                        return Err(Error::storage(format!(
                            "identity item {} is missing its pairing",
                            row.uuid
                        )));
                    }
                };
            Ok(KeychainItem::Identity {
                uuid: row.uuid,
                key_uuid,
                certificate_uuid,
            })
        }
    }
}

impl SqliteStorage {
    fn load_row(&self, udid: &str, uuid: &str) -> Result<Option<KeychainItemRow>> {
        let mut conn = self.conn()?;

        keychain_items::table
            .filter(keychain_items::device_udid.eq(udid))
            .filter(keychain_items::uuid.eq(uuid))
            .first(&mut conn)
            .optional()
            .map_err(storage_err)
    }
}

impl KeychainStore for SqliteStorage {
    fn create_item(&self, udid: &str, item: &NewKeychainItem) -> Result<String> {
        let mut conn = self.conn()?;
        let uuid = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        let row = match item {
            NewKeychainItem::Key { key_der } => NewKeychainItemRow {
                device_udid: udid,
                uuid: &uuid,
                item_class: item.class().as_str(),
                key_der: Some(key_der),
                cert_der: None,
                identity_key_uuid: None,
                identity_cert_uuid: None,
                created_at: now,
            },
            NewKeychainItem::Certificate { cert_der } => NewKeychainItemRow {
                device_udid: udid,
                uuid: &uuid,
                item_class: item.class().as_str(),
                key_der: None,
                cert_der: Some(cert_der),
                identity_key_uuid: None,
                identity_cert_uuid: None,
                created_at: now,
            },
            NewKeychainItem::Identity {
                key_uuid,
                certificate_uuid,
            } => NewKeychainItemRow {
                device_udid: udid,
                uuid: &uuid,
                item_class: item.class().as_str(),
                key_der: None,
                cert_der: None,
                identity_key_uuid: Some(key_uuid),
                identity_cert_uuid: Some(certificate_uuid),
                created_at: now,
            },
        };

        diesel::insert_into(keychain_items::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(storage_err)?;

        Ok(uuid)
    }

    fn load_item(&self, udid: &str, uuid: &str) -> Result<KeychainItem> {
        let row = self
            .load_row(udid, uuid)?
            .ok_or_else(|| Error::not_found(format!("keychain item {uuid}")))?;
        let item = item_from_row(row)?;

        // an identity whose halves were deleted out from under it is
        // unusable, not merely missing
        if let KeychainItem::Identity {
            key_uuid,
            certificate_uuid,
            ..
        } = &item
        {
            for half in [key_uuid, certificate_uuid] {
                if self.load_row(udid, half)?.is_none() {
                    return Err(Error::broken_reference(format!(
                        "identity {uuid} references missing keychain item {half}"
                    )));
                }
            }
        }

        Ok(item)
    }

    fn delete_item(&self, udid: &str, uuid: &str) -> Result<()> {
        let mut conn = self.conn()?;

        let deleted = diesel::delete(
            keychain_items::table
                .filter(keychain_items::device_udid.eq(udid))
                .filter(keychain_items::uuid.eq(uuid)),
        )
        .execute(&mut conn)
        .map_err(storage_err)?;

        if deleted == 0 {
            return Err(Error::not_found(format!("keychain item {uuid}")));
        }
        tracing::debug!(udid, uuid, "deleted keychain item");
        Ok(())
    }

    fn list_items(&self, udid: &str) -> Result<Vec<KeychainItem>> {
        let mut conn = self.conn()?;

        let rows: Vec<KeychainItemRow> = keychain_items::table
            .filter(keychain_items::device_udid.eq(udid))
            .order(keychain_items::created_at.asc())
            .load(&mut conn)
            .map_err(storage_err)?;

        rows.into_iter().map(item_from_row).collect()
    }
}

impl ProfileStore for SqliteStorage {
    fn save_profile(
        &self,
        udid: &str,
        profile_id: &str,
        profile_uuid: &str,
        raw: &[u8],
    ) -> Result<()> {
        if raw.is_empty() {
            return Err(Error::validation("no profile data to save"));
        }

        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let new_profile = NewProfile {
            device_udid: udid,
            profile_id,
            profile_uuid,
            raw,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(profiles::table)
            .values(&new_profile)
            .on_conflict((profiles::device_udid, profiles::profile_id))
            .do_update()
            .set((
                profiles::profile_uuid.eq(profile_uuid),
                profiles::raw.eq(raw),
                profiles::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .map_err(storage_err)?;

        Ok(())
    }

    fn load_profile(&self, udid: &str, profile_id: &str) -> Result<Vec<u8>> {
        let mut conn = self.conn()?;

        let raw: Option<Vec<u8>> = profiles::table
            .filter(profiles::device_udid.eq(udid))
            .filter(profiles::profile_id.eq(profile_id))
            .select(profiles::raw)
            .first(&mut conn)
            .optional()
            .map_err(storage_err)?;

        match raw {
            Some(raw) if !raw.is_empty() => Ok(raw),
            _ => Err(Error::not_found(format!(
                "missing or zero-length profile {profile_id}"
            ))),
        }
    }

    fn remove_profile(&self, udid: &str, profile_id: &str) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::delete(
            profiles::table
                .filter(profiles::device_udid.eq(udid))
                .filter(profiles::profile_id.eq(profile_id)),
        )
        .execute(&mut conn)
        .map_err(storage_err)?;

        tracing::debug!(udid, profile_id, "removed profile");
        Ok(())
    }

    fn list_profile_ids(&self, udid: &str) -> Result<Vec<String>> {
        let mut conn = self.conn()?;

        profiles::table
            .filter(profiles::device_udid.eq(udid))
            .select(profiles::profile_id)
            .order(profiles::profile_id.asc())
            .load(&mut conn)
            .map_err(storage_err)
    }

    fn save_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::validation("no payload ref value to save"));
        }

        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let new_ref = NewPayloadRef {
            device_udid: udid,
            profile_id: payload_ref.profile_id,
            payload_identifier: payload_ref.payload_identifier,
            payload_uuid: payload_ref.payload_uuid,
            ref_key: payload_ref.key,
            value,
            created_at: now,
        };

        diesel::insert_into(payload_refs::table)
            .values(&new_ref)
            .on_conflict((
                payload_refs::device_udid,
                payload_refs::profile_id,
                payload_refs::payload_identifier,
                payload_refs::payload_uuid,
                payload_refs::ref_key,
            ))
            .do_update()
            .set(payload_refs::value.eq(value))
            .execute(&mut conn)
            .map_err(storage_err)?;

        Ok(())
    }

    fn load_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>) -> Result<Option<String>> {
        let mut conn = self.conn()?;

        let value: Option<String> = payload_refs::table
            .filter(payload_refs::device_udid.eq(udid))
            .filter(payload_refs::profile_id.eq(payload_ref.profile_id))
            .filter(payload_refs::payload_identifier.eq(payload_ref.payload_identifier))
            .filter(payload_refs::payload_uuid.eq(payload_ref.payload_uuid))
            .filter(payload_refs::ref_key.eq(payload_ref.key))
            .select(payload_refs::value)
            .first(&mut conn)
            .optional()
            .map_err(storage_err)?;

        Ok(value.filter(|value| !value.is_empty()))
    }

    fn remove_payload_ref(&self, udid: &str, payload_ref: PayloadRef<'_>) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::delete(
            payload_refs::table
                .filter(payload_refs::device_udid.eq(udid))
                .filter(payload_refs::profile_id.eq(payload_ref.profile_id))
                .filter(payload_refs::payload_identifier.eq(payload_ref.payload_identifier))
                .filter(payload_refs::payload_uuid.eq(payload_ref.payload_uuid))
                .filter(payload_refs::ref_key.eq(payload_ref.key)),
        )
        .execute(&mut conn)
        .map_err(storage_err)?;

        Ok(())
    }
}
