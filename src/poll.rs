// src/poll.rs
use std::collections::HashSet;

use tracing::{debug, info};

use crate::{
    error::{AppError, AppResult, FieldErrors},
    models::{CreatePollRequest, NewPoll, Poll, PollFilter, PollVisibility, Vote},
    retry::RetryPolicy,
    stats::{compute_statistics, PollStatistics},
    store::{Store, TallyReconciliation},
};

const MAX_QUESTION_LEN: usize = 500;
const MAX_OPTION_LEN: usize = 255;
const MAX_CATEGORY_LEN: usize = 100;

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

/// Checks a creation request and normalizes it into a [`NewPoll`].
/// All field problems are reported together.
pub fn validate_new_poll(req: CreatePollRequest) -> AppResult<NewPoll> {
    let mut errors = FieldErrors::new();

    let question = req.question.trim().to_string();
    if question.is_empty() {
        push(&mut errors, "question", "This field may not be blank.");
    } else if question.chars().count() > MAX_QUESTION_LEN {
        push(
            &mut errors,
            "question",
            format!("Ensure this field has no more than {MAX_QUESTION_LEN} characters."),
        );
    }

    let options: Vec<String> = req.options.iter().map(|o| o.trim().to_string()).collect();
    if options.len() < 2 {
        push(&mut errors, "options", "Ensure this field has at least 2 elements.");
    }
    if options.iter().any(String::is_empty) {
        push(&mut errors, "options", "Options may not be blank.");
    }
    if options.iter().any(|o| o.chars().count() > MAX_OPTION_LEN) {
        push(
            &mut errors,
            "options",
            format!("Options may have no more than {MAX_OPTION_LEN} characters."),
        );
    }
    let mut seen = HashSet::new();
    if let Some(dup) = options.iter().find(|o| !o.is_empty() && !seen.insert(o.as_str())) {
        push(&mut errors, "options", format!("Duplicate option \"{dup}\"."));
    }

    let category = req.category.trim().to_string();
    if category.is_empty() {
        push(&mut errors, "category", "This field may not be blank.");
    } else if category.chars().count() > MAX_CATEGORY_LEN {
        push(
            &mut errors,
            "category",
            format!("Ensure this field has no more than {MAX_CATEGORY_LEN} characters."),
        );
    }

    let visibility = match req.visibility.as_deref() {
        None => PollVisibility::default(),
        Some(raw) => raw.parse::<PollVisibility>().unwrap_or_else(|e: String| {
            push(&mut errors, "visibility", e);
            PollVisibility::default()
        }),
    };

    let image_url = req
        .image_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    if let Some(url) = &image_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            push(&mut errors, "imageUrl", "Enter a valid URL.");
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    Ok(NewPoll {
        question,
        options,
        category,
        is_anonymous: req.is_anonymous,
        duration: req.duration,
        visibility,
        image_url,
        created_by: req.created_by_user_id,
    })
}

pub async fn create_poll(store: &dyn Store, req: CreatePollRequest) -> AppResult<Poll> {
    let new_poll = validate_new_poll(req)?;

    if !store.user_exists(new_poll.created_by).await? {
        return Err(AppError::NotFound(format!("User {}", new_poll.created_by)));
    }

    let poll = store.insert_poll(new_poll).await?;
    info!(poll_id = poll.id, creator = poll.created_by, options = poll.options.len(), "poll created");
    Ok(poll)
}

pub async fn get_poll(store: &dyn Store, id: i64) -> AppResult<Poll> {
    store
        .get_poll(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Poll {id}")))
}

pub async fn list_polls(store: &dyn Store, filter: &PollFilter) -> AppResult<Vec<Poll>> {
    Ok(store.list_polls(filter).await?)
}

pub async fn categories(store: &dyn Store) -> AppResult<Vec<String>> {
    Ok(store.categories().await?)
}

/// Only the creator may delete a poll; its votes go with it.
pub async fn delete_poll(store: &dyn Store, id: i64, requester_id: i64) -> AppResult<()> {
    let poll = get_poll(store, id).await?;

    if poll.created_by != requester_id {
        return Err(AppError::Forbidden(
            "Only the creator of a poll can delete it".into(),
        ));
    }

    if !store.delete_poll(id).await? {
        return Err(AppError::NotFound(format!("Poll {id}")));
    }
    info!(poll_id = id, requester = requester_id, "poll deleted");
    Ok(())
}

/// Records one vote.
///
/// Checks run in a fixed order: the poll must exist, then the voter, then the
/// option must be declared, then the backend decides uniqueness while it
/// inserts the ledger row and bumps the tally. Storage conflicts are replayed
/// under `retry`.
pub async fn cast_vote(
    store: &dyn Store,
    retry: &RetryPolicy,
    poll_id: i64,
    voter_id: i64,
    option: &str,
) -> AppResult<Vote> {
    let poll = get_poll(store, poll_id).await?;

    if !store.user_exists(voter_id).await? {
        return Err(AppError::NotFound(format!("User {voter_id}")));
    }

    if !poll.has_option(option) {
        debug!(poll_id, voter_id, option, "vote for undeclared option");
        return Err(AppError::InvalidOption(option.to_string()));
    }

    let vote = retry
        .run("record_vote", || store.record_vote(poll_id, voter_id, option))
        .await?;

    info!(poll_id, voter_id, vote_id = vote.id, "vote recorded");
    Ok(vote)
}

pub async fn statistics(store: &dyn Store, poll_id: i64) -> AppResult<PollStatistics> {
    let poll = get_poll(store, poll_id).await?;
    Ok(compute_statistics(&poll))
}

/// Rewrites the tally from the ledger, logging when they disagreed.
pub async fn reconcile(
    store: &dyn Store,
    retry: &RetryPolicy,
    poll_id: i64,
) -> AppResult<TallyReconciliation> {
    let report = retry
        .run("reconcile_tally", || store.reconcile_tally(poll_id))
        .await?;

    if report.drifted() {
        tracing::warn!(poll_id, before = ?report.before, after = ?report.after, "tally drift repaired");
    }
    Ok(report)
}
