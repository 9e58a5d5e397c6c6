/// User-visible notifications sent back to a requester.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    TryLater,
    Cancelled { title: String },
    Unavailable { title: String },
    AlreadyInProgress,
    TooManyTasks,
    NothingToCancel,
    SlowDown { retry_after_secs: u64 },
    CacheInvalidated,
    SearchAccepted,
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Self::TryLater => {
                "Something went wrong while processing your request. Please try later.".to_owned()
            }
            Self::Cancelled { title } => format!("Download of {title} has been cancelled."),
            Self::Unavailable { title } => {
                format!("Sources for {title} are unavailable right now.")
            }
            Self::AlreadyInProgress => "This file is already being downloaded.".to_owned(),
            Self::TooManyTasks => {
                "Too many downloads in progress. Wait until some of them finish.".to_owned()
            }
            Self::NothingToCancel => "There is no download to cancel.".to_owned(),
            Self::SlowDown { retry_after_secs } => {
                format!("Too many requests. Try again in {retry_after_secs} seconds.")
            }
            Self::CacheInvalidated => {
                "Thanks, the file will be fetched again next time.".to_owned()
            }
            Self::SearchAccepted => "Searching...".to_owned(),
        }
    }
}
