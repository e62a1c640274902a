use uuid::{Builder, Uuid};

// Random 128-bit id (RFC 4122 v4 layout)
pub fn random_id() -> Uuid {
    Builder::from_random_bytes(rand::random()).into_uuid()
}

/// Draws random ids until `taken` reports one as free.
pub fn unique_id(taken: impl Fn(&Uuid) -> bool) -> Uuid {
    unique_id_from(random_id, taken)
}

/// Same as [`unique_id`] with an explicit generator.
pub fn unique_id_from(mut generate: impl FnMut() -> Uuid, taken: impl Fn(&Uuid) -> bool) -> Uuid {
    loop {
        let id = generate();
        if !taken(&id) {
            return id;
        }
    }
}
