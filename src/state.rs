use crate::modules::transcode::service::TranscodeService;

#[derive(Clone)]
pub struct AppState {
    pub transcoder: TranscodeService,
}

impl AppState {
    pub fn new(transcoder: TranscodeService) -> Self {
        Self { transcoder }
    }
}
