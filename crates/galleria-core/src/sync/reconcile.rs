//! Pure diff between the cached items and the current remote messages.

use std::collections::{HashMap, HashSet};

use crate::approval::Approval;
use crate::discord::{RemoteAttachment, RemoteMessage};
use crate::models::GalleryItem;

/// One attachment to download and store.
#[derive(Debug, Clone, Copy)]
pub struct ImportJob<'a> {
    pub message: &'a RemoteMessage,
    pub attachment: &'a RemoteAttachment,
}

impl ImportJob<'_> {
    pub fn item_id(&self) -> String {
        GalleryItem::compose_id(&self.message.id, &self.attachment.id)
    }
}

#[derive(Debug, Default)]
pub struct ReconcilePlan<'a> {
    pub keep: Vec<GalleryItem>,
    pub remove: Vec<GalleryItem>,
    pub imports: Vec<ImportJob<'a>>,
}

/// Split cached items into kept and removed, and list missing attachments.
///
/// Items survive while their message exists and is approved or its approval
/// could not be decided. Messages without a decision count as rejected.
/// Only approved messages with no kept item produce imports, one per image
/// attachment; a message that is already represented is never re-imported.
/// Duplicate cached ids keep their first occurrence.
pub fn reconcile<'a>(
    cached: Vec<GalleryItem>,
    messages: &'a [RemoteMessage],
    approvals: &HashMap<String, Approval>,
) -> ReconcilePlan<'a> {
    let present: HashSet<&str> = messages.iter().map(|message| message.id.as_str()).collect();
    let approval_of = |message_id: &str| {
        approvals
            .get(message_id)
            .copied()
            .unwrap_or(Approval::Rejected)
    };

    let mut plan = ReconcilePlan::default();
    let mut kept_ids = HashSet::new();
    for item in cached {
        let retained = present.contains(item.message_id.as_str())
            && approval_of(&item.message_id) != Approval::Rejected;
        if retained && kept_ids.insert(item.id.clone()) {
            plan.keep.push(item);
        } else {
            plan.remove.push(item);
        }
    }

    let represented: HashSet<&str> = plan
        .keep
        .iter()
        .map(|item| item.message_id.as_str())
        .collect();
    for message in messages {
        if approval_of(&message.id) != Approval::Approved
            || represented.contains(message.id.as_str())
        {
            continue;
        }
        plan.imports.extend(
            message
                .image_attachments()
                .map(|attachment| ImportJob {
                    message,
                    attachment,
                })
                .filter(|job| kept_ids.insert(job.item_id())),
        );
    }

    plan
}
