pub mod room;

pub use room::{
    document_id_from_room_key, is_supported_protocol_version, room_key, room_path, RoomFrame,
    CURRENT_PROTOCOL_VERSION,
};
