//! Diesel schema definitions.

diesel::table! {
    devices (udid) {
        udid -> Text,
        serial -> Text,
        computer_name -> Text,
        mdm_profile_identifier -> Nullable<Text>,
        mdm_identity_keychain_uuid -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    profiles (device_udid, profile_id) {
        device_udid -> Text,
        profile_id -> Text,
        profile_uuid -> Text,
        raw -> Binary,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    payload_refs (device_udid, profile_id, payload_identifier, payload_uuid, ref_key) {
        device_udid -> Text,
        profile_id -> Text,
        payload_identifier -> Text,
        payload_uuid -> Text,
        ref_key -> Text,
        value -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    keychain_items (device_udid, uuid) {
        device_udid -> Text,
        uuid -> Text,
        item_class -> Text,
        key_der -> Nullable<Binary>,
        cert_der -> Nullable<Binary>,
        identity_key_uuid -> Nullable<Text>,
        identity_cert_uuid -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::joinable!(profiles -> devices (device_udid));
diesel::joinable!(keychain_items -> devices (device_udid));

diesel::allow_tables_to_appear_in_same_query!(devices, profiles, payload_refs, keychain_items,);
