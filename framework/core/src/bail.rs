/// Return this error from a scenario's `iterate` hook to indicate that the virtual user is bailing.
///
/// This should be used when a virtual user hits an error that is fatal to that user but not to
/// the run. For example, if the user's connection state is unrecoverable then it can bail and the
/// scheduler will replace it with a fresh virtual user on its next reconcile.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct VuBailError {
    msg: String,
}

impl VuBailError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Default for VuBailError {
    fn default() -> Self {
        Self {
            msg: "Virtual user is bailing".to_string(),
        }
    }
}
