use crate::memory::layout::entity as layout;

pub type Vec3 = [f32; 3];

/// Entity record as laid out inside a host slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityRecord {
    pub type_tag: u32,
    pub handle: u32,
    pub flags: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub model_id: u32,
    pub player_id: u32,
    pub animation: u32,
    pub ai_state: u32,
    pub health: u32,
    pub armor: u32,
    pub ped_type: u8,
    pub in_vehicle: u8,
    pub vehicle_ptr: u32,
}

/// Mutable state carried by an update; `None` leaves the host field alone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerUpdate {
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Option<Vec3>,
    pub animation: Option<u16>,
    pub health: Option<u8>,
    pub armor: Option<u8>,
}

impl PlayerUpdate {
    pub fn pose(position: Vec3, rotation: Vec3) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }
}

fn get_u32(bytes: &[u8], at: u32) -> u32 {
    let at = at as usize;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn get_vec3(bytes: &[u8], at: u32) -> Vec3 {
    [
        f32::from_bits(get_u32(bytes, at)),
        f32::from_bits(get_u32(bytes, at + 4)),
        f32::from_bits(get_u32(bytes, at + 8)),
    ]
}

fn put_u32(bytes: &mut [u8], at: u32, value: u32) {
    let at = at as usize;
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_vec3(bytes: &mut [u8], at: u32, value: Vec3) {
    for (i, v) in value.iter().enumerate() {
        put_u32(bytes, at + 4 * i as u32, v.to_bits());
    }
}

/// Encode three floats for a direct field write.
pub fn vec3_bytes(value: Vec3) -> [u8; layout::VEC3 as usize] {
    let mut out = [0u8; layout::VEC3 as usize];
    put_vec3(&mut out, 0, value);
    out
}

impl EntityRecord {
    /// Minimal record for a mirrored remote player: occupied, AI disabled,
    /// default health, zeroed rotation and velocity.
    pub fn remote_player(player_id: u32, position: Vec3) -> Self {
        Self {
            type_tag: layout::TAG_PED,
            player_id,
            position,
            ai_state: layout::AI_DISABLED,
            health: layout::DEFAULT_HEALTH,
            ped_type: layout::PED_TYPE_CIVILIAN,
            ..Default::default()
        }
    }

    pub fn is_free(&self) -> bool {
        self.type_tag == layout::TAG_FREE
    }

    /// Decode from at least `RECORD_LEN` bytes; `None` if too short.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < layout::RECORD_LEN {
            return None;
        }
        Some(Self {
            type_tag: get_u32(bytes, layout::TYPE_TAG),
            handle: get_u32(bytes, layout::HANDLE),
            flags: get_u32(bytes, layout::FLAGS),
            position: get_vec3(bytes, layout::POSITION),
            rotation: get_vec3(bytes, layout::ROTATION),
            velocity: get_vec3(bytes, layout::VELOCITY),
            model_id: get_u32(bytes, layout::MODEL_ID),
            player_id: get_u32(bytes, layout::PLAYER_ID),
            animation: get_u32(bytes, layout::ANIMATION),
            ai_state: get_u32(bytes, layout::AI_STATE),
            health: get_u32(bytes, layout::HEALTH),
            armor: get_u32(bytes, layout::ARMOR),
            ped_type: bytes[layout::PED_TYPE as usize],
            in_vehicle: bytes[layout::IN_VEHICLE as usize],
            vehicle_ptr: get_u32(bytes, layout::VEHICLE_PTR),
        })
    }

    pub fn encode(&self) -> [u8; layout::RECORD_LEN] {
        let mut bytes = [0u8; layout::RECORD_LEN];
        put_u32(&mut bytes, layout::TYPE_TAG, self.type_tag);
        put_u32(&mut bytes, layout::HANDLE, self.handle);
        put_u32(&mut bytes, layout::FLAGS, self.flags);
        put_vec3(&mut bytes, layout::POSITION, self.position);
        put_vec3(&mut bytes, layout::ROTATION, self.rotation);
        put_vec3(&mut bytes, layout::VELOCITY, self.velocity);
        put_u32(&mut bytes, layout::MODEL_ID, self.model_id);
        put_u32(&mut bytes, layout::PLAYER_ID, self.player_id);
        put_u32(&mut bytes, layout::ANIMATION, self.animation);
        put_u32(&mut bytes, layout::AI_STATE, self.ai_state);
        put_u32(&mut bytes, layout::HEALTH, self.health);
        put_u32(&mut bytes, layout::ARMOR, self.armor);
        bytes[layout::PED_TYPE as usize] = self.ped_type;
        bytes[layout::IN_VEHICLE as usize] = self.in_vehicle;
        put_u32(&mut bytes, layout::VEHICLE_PTR, self.vehicle_ptr);
        bytes
    }
}
