use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use glimpse_db::models::StoryRow;
use glimpse_db::now_ms;
use glimpse_types::api::{Claims, CreateStoryRequest, StoryGroup, StoryViewerEntry, ToggleLikeResponse};
use glimpse_types::events::GatewayEvent;

use crate::auth::{AppState, AppStateInner, resolve_user};
use crate::convert::{ms_to_datetime, parse_uuid, story_view, user_public};
use crate::error::{ApiError, ApiResult};
use crate::run_blocking;

/// Stories live exactly this long; `expires_at` is fixed at creation and
/// never extended.
pub const STORY_TTL_MS: i64 = 24 * 60 * 60 * 1000;

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateStoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let gate_state = state.clone();
    let gate_claims = claims.clone();
    let caller = run_blocking(move || resolve_user(&gate_state.db, &gate_claims)).await?;

    let media_url = state
        .media
        .resolve_url(req.media_ref)
        .await
        .ok_or(ApiError::MediaNotFound)?;

    let story_id = Uuid::new_v4();
    let now = now_ms();
    let expires_at = now + STORY_TTL_MS;

    let insert_state = state.clone();
    let owner_id = caller.id.clone();
    let story = run_blocking(move || {
        insert_state.db.insert_story(
            &story_id.to_string(),
            &owner_id,
            &req.media_ref.to_string(),
            &media_url,
            req.media_type.as_str(),
            req.caption.as_deref(),
            now,
            expires_at,
        )?;
        let row = insert_state
            .db
            .get_story(&story_id.to_string())?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("story vanished after insert")))?;
        Ok(story_view(row))
    })
    .await?;

    state.dispatcher.broadcast(GatewayEvent::StoryCreate {
        story_id,
        owner_id: claims.sub,
        username: claims.username.clone(),
    });

    Ok((StatusCode::CREATED, Json(story)))
}

/// Group rows (already newest-first) by owner, preserving encounter order
/// of owners and story order within each group.
fn group_by_owner(rows: Vec<StoryRow>) -> Vec<(String, Vec<StoryRow>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<StoryRow>)> = Vec::new();

    for row in rows {
        match index.get(&row.owner_id) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(row.owner_id.clone(), groups.len());
                groups.push((row.owner_id.clone(), vec![row]));
            }
        }
    }

    groups
}

/// The story feed: active stories from the caller and everyone they follow,
/// grouped by owner. The caller's own group sorts first; the rest order by
/// each group's newest story.
pub async fn feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let groups = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let now = now_ms();

        let mut visible: HashSet<String> = state.db.following_of(&caller.id)?.into_iter().collect();
        visible.insert(caller.id.clone());

        let rows: Vec<StoryRow> = state
            .db
            .active_stories(now)?
            .into_iter()
            .filter(|row| visible.contains(&row.owner_id))
            .collect();

        let story_ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let viewed = state.db.viewed_story_ids(&caller.id, &story_ids)?;

        let mut groups = Vec::new();
        for (owner_id, stories) in group_by_owner(rows) {
            let Some(owner) = state.db.get_public_user(&owner_id)? else {
                warn!("Story owner '{}' missing, skipping group", owner_id);
                continue;
            };

            let is_own = owner_id == caller.id;
            let has_unseen = stories.iter().any(|s| !viewed.contains(&s.id));

            groups.push(StoryGroup {
                user: user_public(owner),
                stories: stories.into_iter().map(story_view).collect(),
                has_unseen,
                is_own,
            });
        }

        // Own group first, then by newest story, descending. Groups are
        // non-empty by construction.
        groups.sort_by(|a, b| {
            b.is_own
                .cmp(&a.is_own)
                .then_with(|| b.stories[0].created_at.cmp(&a.stories[0].created_at))
        });

        Ok(groups)
    })
    .await?;

    Ok(Json(groups))
}

/// A single user's active stories, newest first.
pub async fn user_stories(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let stories = run_blocking(move || {
        resolve_user(&state.db, &claims)?;

        let uid = user_id.to_string();
        state
            .db
            .get_public_user(&uid)?
            .ok_or(ApiError::NotFound("user"))?;

        let rows = state.db.active_stories_for_user(&uid, now_ms())?;
        Ok(rows.into_iter().map(story_view).collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(stories))
}

/// Record a view. Idempotent: duplicates are silent no-ops, and an owner
/// viewing their own story is never counted or recorded.
pub async fn record_view(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let sid = story_id.to_string();

        let story = state.db.get_story(&sid)?.ok_or(ApiError::NotFound("story"))?;
        if story.expires_at <= now_ms() {
            // Expired stories are invisible everywhere, swept or not
            return Err(ApiError::NotFound("story"));
        }

        if story.owner_id != caller.id {
            state.db.record_story_view(&sid, &caller.id, now_ms())?;
        }
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let like_state = state.clone();
    let like_claims = claims.clone();
    let liked = run_blocking(move || {
        let caller = resolve_user(&like_state.db, &like_claims)?;
        like_state
            .db
            .toggle_story_like(&story_id.to_string(), &caller.id, now_ms())?
            .ok_or(ApiError::NotFound("story"))
    })
    .await?;

    state.dispatcher.broadcast(GatewayEvent::StoryLike {
        story_id,
        user_id: claims.sub,
        liked,
    });

    Ok(Json(ToggleLikeResponse { liked }))
}

/// Who has seen a story, newest first. Owner only.
pub async fn viewers(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let entries = run_blocking(move || {
        let caller = resolve_user(&state.db, &claims)?;
        let sid = story_id.to_string();

        let story = state.db.get_story(&sid)?.ok_or(ApiError::NotFound("story"))?;
        if story.owner_id != caller.id {
            return Err(ApiError::Forbidden("only the owner can see story viewers"));
        }

        let rows = state.db.story_viewers(&sid)?;
        Ok(rows
            .into_iter()
            .map(|row| StoryViewerEntry {
                user: user_public(glimpse_db::models::PublicUserRow {
                    id: row.user_id,
                    username: row.username,
                    fullname: row.fullname,
                    avatar_url: row.avatar_url,
                }),
                viewed_at: ms_to_datetime(row.viewed_at),
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(entries))
}

/// Owner-initiated removal: view and like records go with the row, and the
/// stored media is released.
pub async fn delete(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let del_state = state.clone();
    let del_claims = claims.clone();
    let (owner_id, media_ref) = run_blocking(move || {
        let caller = resolve_user(&del_state.db, &del_claims)?;
        let sid = story_id.to_string();

        let story = del_state.db.get_story(&sid)?.ok_or(ApiError::NotFound("story"))?;
        if story.owner_id != caller.id {
            return Err(ApiError::Forbidden("only the owner can delete a story"));
        }

        del_state.db.delete_story_rows(&sid)?;
        Ok((story.owner_id, story.media_ref))
    })
    .await?;

    if let Ok(media_ref) = media_ref.parse::<Uuid>() {
        if let Err(e) = state.media.release(media_ref).await {
            warn!("Failed to release media {}: {}", media_ref, e);
        }
    }

    state.dispatcher.broadcast(GatewayEvent::StoryDelete {
        story_id,
        owner_id: parse_uuid(&owner_id, "user"),
    });

    Ok(StatusCode::NO_CONTENT)
}

/// Sweep every story past expiry with the same teardown as an owner delete.
/// "Already gone" is success on every step, so concurrent sweeps and
/// owner deletes never error against each other. Returns the count removed.
pub async fn cleanup_expired(state: &AppStateInner) -> anyhow::Result<usize> {
    let expired = state.db.expired_stories(now_ms())?;

    let mut removed = 0;
    for (story_id, owner_id, media_ref) in expired {
        // A concurrent sweep or owner delete may have won; already gone is fine
        if !state.db.delete_story_rows(&story_id)? {
            continue;
        }
        removed += 1;

        if let Ok(media_ref) = media_ref.parse::<Uuid>() {
            state.media.release(media_ref).await.ok();
        }

        state.dispatcher.broadcast(GatewayEvent::StoryDelete {
            story_id: parse_uuid(&story_id, "story"),
            owner_id: parse_uuid(&owner_id, "user"),
        });
    }

    if removed > 0 {
        info!("Cleanup: removed {} expired stories", removed);
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::group_by_owner;
    use glimpse_db::models::StoryRow;

    fn story(id: &str, owner: &str, created_at: i64) -> StoryRow {
        StoryRow {
            id: id.into(),
            owner_id: owner.into(),
            media_ref: "ref".into(),
            media_url: "/media/ref".into(),
            media_type: "image".into(),
            caption: None,
            views_count: 0,
            likes_count: 0,
            created_at,
            expires_at: created_at + super::STORY_TTL_MS,
        }
    }

    #[test]
    fn grouping_preserves_newest_first_order() {
        // Input is newest-first, interleaved across owners
        let rows = vec![
            story("s4", "bob", 4_000),
            story("s3", "alice", 3_000),
            story("s2", "bob", 2_000),
            story("s1", "alice", 1_000),
        ];

        let groups = group_by_owner(rows);
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].0, "bob");
        let bob_ids: Vec<&str> = groups[0].1.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(bob_ids, ["s4", "s2"]);

        assert_eq!(groups[1].0, "alice");
        let alice_ids: Vec<&str> = groups[1].1.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(alice_ids, ["s3", "s1"]);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_owner(vec![]).is_empty());
    }
}
