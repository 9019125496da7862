use bytes::Bytes;

/// One file of a multi-file upload, fully buffered.
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub name: String,
    pub body: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}
