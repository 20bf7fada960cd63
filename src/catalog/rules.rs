use super::{
    Applied, CheckKind, ChunkSpec, FixStrategy, ReportContext, Reporter, RuleDefinition,
};
use crate::error::Result;
use crate::recovery::FixContext;
use crate::store::FetchedRow;
use rusqlite::params;
use rusqlite::types::Value;

const TOPIC_STEP: i64 = 500;
const STATS_STEP: i64 = 200;
const MESSAGE_STEP: i64 = 500;
const LOG_STEP: i64 = 500;
const SUBJECT_STEP: i64 = 100;

const MAX_TOPIC: &str = "SELECT MAX(id_topic) FROM topics";

/// The built-in catalog, in execution order
pub fn standard_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition {
            id: "zero_topics",
            check_sql: "SELECT COUNT(*) FROM topics WHERE id_topic = 0",
            check: CheckKind::Count,
            chunk: None,
            fix: FixStrategy::RowCallback {
                fetch_sql: "SELECT id_topic FROM topics WHERE id_topic = 0",
                columns: &["id_topic"],
                apply: renumber_zero_topic,
            },
            report: Some(Reporter::Template {
                key: "zero_topics",
                args: &[],
            }),
            cascades_to: &["stats_topics"],
        },
        RuleDefinition {
            id: "zero_messages",
            check_sql: "SELECT COUNT(*) FROM messages WHERE id_msg = 0",
            check: CheckKind::Count,
            chunk: None,
            fix: FixStrategy::BlindQuery(
                "UPDATE messages SET id_msg = (SELECT COALESCE(MAX(id_msg), 0) + 1 FROM messages)
                 WHERE id_msg = 0",
            ),
            report: Some(Reporter::Template {
                key: "zero_messages",
                args: &[],
            }),
            cascades_to: &["stats_topics"],
        },
        RuleDefinition {
            id: "missing_topic_for_message",
            check_sql: "SELECT m.id_topic, m.id_msg
                FROM messages AS m
                LEFT JOIN topics AS t ON t.id_topic = m.id_topic
                WHERE t.id_topic IS NULL
                    AND m.id_topic >= :low AND m.id_topic < :high
                ORDER BY m.id_topic, m.id_msg",
            check: CheckKind::RowSet {
                columns: &["id_topic", "id_msg"],
            },
            chunk: Some(ChunkSpec {
                step: MESSAGE_STEP,
                max_id_sql: "SELECT MAX(id_topic) FROM messages",
            }),
            fix: FixStrategy::RowCallback {
                fetch_sql: "SELECT m.id_topic, MAX(m.id_board) AS id_board,
                        MIN(m.id_msg) AS myid_first_msg, MAX(m.id_msg) AS myid_last_msg,
                        SUM(CASE WHEN m.approved = 1 THEN 1 ELSE 0 END) AS my_approved,
                        SUM(CASE WHEN m.approved = 1 THEN 0 ELSE 1 END) AS my_unapproved
                    FROM messages AS m
                    LEFT JOIN topics AS t ON t.id_topic = m.id_topic
                    WHERE t.id_topic IS NULL
                        AND m.id_topic >= :low AND m.id_topic < :high
                    GROUP BY m.id_topic",
                columns: &[
                    "id_topic",
                    "id_board",
                    "myid_first_msg",
                    "myid_last_msg",
                    "my_approved",
                    "my_unapproved",
                ],
                apply: regroup_orphaned_messages,
            },
            report: Some(Reporter::Template {
                key: "missing_topic_for_message",
                args: &[1, 0],
            }),
            cascades_to: &["stats_topics", "missing_boards", "missing_cached_subject"],
        },
        RuleDefinition {
            id: "missing_messages",
            check_sql: "SELECT t.id_topic
                FROM topics AS t
                LEFT JOIN messages AS m ON m.id_topic = t.id_topic
                WHERE m.id_msg IS NULL
                    AND t.id_topic >= :low AND t.id_topic < :high
                ORDER BY t.id_topic",
            check: CheckKind::RowSet {
                columns: &["id_topic"],
            },
            chunk: Some(ChunkSpec {
                step: TOPIC_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_topic",
                apply: delete_empty_topics,
            },
            report: Some(Reporter::Template {
                key: "missing_messages",
                args: &[0],
            }),
            cascades_to: &[
                "polls_missing_topics",
                "missing_calendar_topics",
                "missing_log_topics",
                "missing_topic_for_cache",
            ],
        },
        RuleDefinition {
            id: "polls_missing_topics",
            check_sql: "SELECT p.id_poll, p.id_member, p.poster_name, p.question
                FROM polls AS p
                LEFT JOIN topics AS t ON t.id_poll = p.id_poll
                WHERE t.id_topic IS NULL
                    AND p.id_poll >= :low AND p.id_poll < :high
                ORDER BY p.id_poll",
            check: CheckKind::RowSet {
                columns: &["id_poll", "id_member", "poster_name", "question"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_poll) FROM polls",
            }),
            fix: FixStrategy::RowCallback {
                fetch_sql: "SELECT p.id_poll, p.id_member, p.poster_name, p.question
                    FROM polls AS p
                    LEFT JOIN topics AS t ON t.id_poll = p.id_poll
                    WHERE t.id_topic IS NULL
                        AND p.id_poll >= :low AND p.id_poll < :high
                    ORDER BY p.id_poll",
                columns: &["id_poll", "id_member", "poster_name", "question"],
                apply: salvage_orphaned_poll,
            },
            report: Some(Reporter::Template {
                key: "polls_missing_topics",
                args: &[0],
            }),
            cascades_to: &["missing_cached_subject"],
        },
        RuleDefinition {
            id: "poll_options_missing_poll",
            check_sql: "SELECT pc.id_poll, COUNT(*) AS num_options
                FROM poll_choices AS pc
                LEFT JOIN polls AS p ON p.id_poll = pc.id_poll
                WHERE p.id_poll IS NULL
                    AND pc.id_poll >= :low AND pc.id_poll < :high
                GROUP BY pc.id_poll
                ORDER BY pc.id_poll",
            check: CheckKind::RowSet {
                columns: &["id_poll", "num_options"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_poll) FROM poll_choices",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_poll",
                apply: delete_orphaned_poll_choices,
            },
            report: Some(Reporter::Template {
                key: "poll_options_missing_poll",
                args: &[0, 1],
            }),
            cascades_to: &["missing_log_poll_vote"],
        },
        RuleDefinition {
            id: "missing_polls",
            check_sql: "SELECT t.id_topic, t.id_poll
                FROM topics AS t
                LEFT JOIN polls AS p ON p.id_poll = t.id_poll
                WHERE t.id_poll != 0 AND p.id_poll IS NULL
                    AND t.id_topic >= :low AND t.id_topic < :high
                ORDER BY t.id_topic",
            check: CheckKind::RowSet {
                columns: &["id_topic", "id_poll"],
            },
            chunk: Some(ChunkSpec {
                step: TOPIC_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::BlindQuery(
                "UPDATE topics SET id_poll = 0
                 WHERE id_poll != 0
                    AND id_topic >= :low AND id_topic < :high
                    AND NOT EXISTS (SELECT 1 FROM polls AS p WHERE p.id_poll = topics.id_poll)",
            ),
            report: Some(Reporter::Template {
                key: "missing_polls",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "stats_topics",
            check_sql: TOPIC_BOUNDS_SQL,
            check: CheckKind::RowSet {
                columns: TOPIC_BOUNDS_COLUMNS,
            },
            chunk: Some(ChunkSpec {
                step: STATS_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::RowCallback {
                fetch_sql: TOPIC_BOUNDS_SQL,
                columns: TOPIC_BOUNDS_COLUMNS,
                apply: fix_topic_bounds,
            },
            report: Some(Reporter::Template {
                key: "stats_topics",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "stats_topics2",
            check_sql: TOPIC_REPLIES_SQL,
            check: CheckKind::RowSet {
                columns: TOPIC_REPLIES_COLUMNS,
            },
            chunk: Some(ChunkSpec {
                step: STATS_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::RowCallback {
                fetch_sql: TOPIC_REPLIES_SQL,
                columns: TOPIC_REPLIES_COLUMNS,
                apply: fix_topic_replies,
            },
            report: Some(Reporter::Template {
                key: "stats_topics2",
                args: &[0, 1, 2],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "stats_topics3",
            check_sql: TOPIC_UNAPPROVED_SQL,
            check: CheckKind::RowSet {
                columns: TOPIC_UNAPPROVED_COLUMNS,
            },
            chunk: Some(ChunkSpec {
                step: STATS_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::RowCallback {
                fetch_sql: TOPIC_UNAPPROVED_SQL,
                columns: TOPIC_UNAPPROVED_COLUMNS,
                apply: fix_topic_unapproved,
            },
            report: Some(Reporter::Template {
                key: "stats_topics3",
                args: &[0, 1, 2],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_boards",
            check_sql: "SELECT t.id_topic, t.id_board
                FROM topics AS t
                LEFT JOIN boards AS b ON b.id_board = t.id_board
                WHERE b.id_board IS NULL
                    AND t.id_topic >= :low AND t.id_topic < :high
                ORDER BY t.id_topic",
            check: CheckKind::RowSet {
                columns: &["id_topic", "id_board"],
            },
            chunk: Some(ChunkSpec {
                step: TOPIC_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::RowCallback {
                fetch_sql: "SELECT t.id_board, COUNT(*) AS my_num_topics
                    FROM topics AS t
                    LEFT JOIN boards AS b ON b.id_board = t.id_board
                    WHERE b.id_board IS NULL
                        AND t.id_topic >= :low AND t.id_topic < :high
                    GROUP BY t.id_board",
                columns: &["id_board", "my_num_topics"],
                apply: rehome_board_topics,
            },
            report: Some(Reporter::Template {
                key: "missing_boards",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_categories",
            check_sql: "SELECT b.id_board, b.id_cat
                FROM boards AS b
                LEFT JOIN categories AS c ON c.id_cat = b.id_cat
                WHERE c.id_cat IS NULL
                ORDER BY b.id_board",
            check: CheckKind::RowSet {
                columns: &["id_board", "id_cat"],
            },
            chunk: None,
            fix: FixStrategy::BatchCollect {
                key_column: "id_board",
                apply: move_boards_to_salvage_category,
            },
            report: Some(Reporter::Template {
                key: "missing_categories",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_posters",
            check_sql: "SELECT m.id_msg, m.id_member
                FROM messages AS m
                LEFT JOIN members AS mem ON mem.id_member = m.id_member
                WHERE mem.id_member IS NULL AND m.id_member != 0
                    AND m.id_msg >= :low AND m.id_msg < :high
                ORDER BY m.id_msg",
            check: CheckKind::RowSet {
                columns: &["id_msg", "id_member"],
            },
            chunk: Some(ChunkSpec {
                step: MESSAGE_STEP,
                max_id_sql: "SELECT MAX(id_msg) FROM messages",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_msg",
                apply: make_guest_messages,
            },
            report: Some(Reporter::Template {
                key: "missing_posters",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_parents",
            check_sql: "SELECT b.id_board, b.id_parent
                FROM boards AS b
                LEFT JOIN boards AS p ON p.id_board = b.id_parent
                WHERE b.id_parent != 0 AND p.id_board IS NULL
                ORDER BY b.id_board",
            check: CheckKind::RowSet {
                columns: &["id_board", "id_parent"],
            },
            chunk: None,
            fix: FixStrategy::BatchCollect {
                key_column: "id_board",
                apply: detach_orphaned_child_boards,
            },
            report: Some(Reporter::Template {
                key: "missing_parents",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_calendar_topics",
            check_sql: "SELECT cal.id_event, cal.id_topic
                FROM calendar AS cal
                LEFT JOIN topics AS t ON t.id_topic = cal.id_topic
                WHERE cal.id_topic != 0 AND t.id_topic IS NULL
                    AND cal.id_topic >= :low AND cal.id_topic < :high
                ORDER BY cal.id_event",
            check: CheckKind::RowSet {
                columns: &["id_event", "id_topic"],
            },
            chunk: Some(ChunkSpec {
                step: 1000,
                max_id_sql: "SELECT MAX(id_topic) FROM calendar",
            }),
            fix: FixStrategy::BlindQuery(
                "UPDATE calendar SET id_topic = 0, id_board = 0
                 WHERE id_topic != 0
                    AND id_topic >= :low AND id_topic < :high
                    AND NOT EXISTS (SELECT 1 FROM topics AS t WHERE t.id_topic = calendar.id_topic)",
            ),
            report: Some(Reporter::Template {
                key: "missing_calendar_topics",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_log_topics",
            check_sql: "SELECT lt.id_topic
                FROM log_topics AS lt
                LEFT JOIN topics AS t ON t.id_topic = lt.id_topic
                WHERE t.id_topic IS NULL
                    AND lt.id_topic >= :low AND lt.id_topic < :high
                GROUP BY lt.id_topic
                ORDER BY lt.id_topic",
            check: CheckKind::RowSet {
                columns: &["id_topic"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_topic) FROM log_topics",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_topic",
                apply: delete_log_topics_by_topic,
            },
            report: Some(Reporter::Template {
                key: "missing_log_topics",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_log_topics_members",
            check_sql: "SELECT lt.id_member
                FROM log_topics AS lt
                LEFT JOIN members AS mem ON mem.id_member = lt.id_member
                WHERE mem.id_member IS NULL
                    AND lt.id_member >= :low AND lt.id_member < :high
                GROUP BY lt.id_member
                ORDER BY lt.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_member) FROM log_topics",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_member",
                apply: delete_log_topics_by_member,
            },
            report: Some(Reporter::Template {
                key: "missing_log_topics_members",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_log_boards",
            check_sql: "SELECT lb.id_board
                FROM log_boards AS lb
                LEFT JOIN boards AS b ON b.id_board = lb.id_board
                WHERE b.id_board IS NULL
                GROUP BY lb.id_board
                ORDER BY lb.id_board",
            check: CheckKind::RowSet {
                columns: &["id_board"],
            },
            chunk: None,
            fix: FixStrategy::BatchCollect {
                key_column: "id_board",
                apply: delete_log_boards_by_board,
            },
            report: Some(Reporter::Template {
                key: "missing_log_boards",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_log_boards_members",
            check_sql: "SELECT lb.id_member
                FROM log_boards AS lb
                LEFT JOIN members AS mem ON mem.id_member = lb.id_member
                WHERE mem.id_member IS NULL
                    AND lb.id_member >= :low AND lb.id_member < :high
                GROUP BY lb.id_member
                ORDER BY lb.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_member) FROM log_boards",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_member",
                apply: delete_log_boards_by_member,
            },
            report: Some(Reporter::Template {
                key: "missing_log_boards_members",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_log_mark_read",
            check_sql: "SELECT lmr.id_board
                FROM log_mark_read AS lmr
                LEFT JOIN boards AS b ON b.id_board = lmr.id_board
                WHERE b.id_board IS NULL
                GROUP BY lmr.id_board
                ORDER BY lmr.id_board",
            check: CheckKind::RowSet {
                columns: &["id_board"],
            },
            chunk: None,
            fix: FixStrategy::BatchCollect {
                key_column: "id_board",
                apply: delete_mark_read_by_board,
            },
            report: Some(Reporter::Template {
                key: "missing_log_mark_read",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_notify_members",
            check_sql: "SELECT ln.id_member
                FROM log_notify AS ln
                LEFT JOIN members AS mem ON mem.id_member = ln.id_member
                WHERE mem.id_member IS NULL
                    AND ln.id_member >= :low AND ln.id_member < :high
                GROUP BY ln.id_member
                ORDER BY ln.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_member) FROM log_notify",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_member",
                apply: delete_notify_by_member,
            },
            report: Some(Reporter::Template {
                key: "missing_notify_members",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_pms",
            check_sql: "SELECT pmr.id_pm
                FROM pm_recipients AS pmr
                LEFT JOIN personal_messages AS pm ON pm.id_pm = pmr.id_pm
                WHERE pm.id_pm IS NULL
                    AND pmr.id_pm >= :low AND pmr.id_pm < :high
                GROUP BY pmr.id_pm
                ORDER BY pmr.id_pm",
            check: CheckKind::RowSet {
                columns: &["id_pm"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_pm) FROM pm_recipients",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_pm",
                apply: delete_recipients_by_pm,
            },
            report: Some(Reporter::Template {
                key: "missing_pms",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_recipients",
            check_sql: "SELECT pmr.id_member
                FROM pm_recipients AS pmr
                LEFT JOIN members AS mem ON mem.id_member = pmr.id_member
                WHERE mem.id_member IS NULL
                    AND pmr.id_member >= :low AND pmr.id_member < :high
                GROUP BY pmr.id_member
                ORDER BY pmr.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_member) FROM pm_recipients",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_member",
                apply: delete_recipients_by_member,
            },
            report: Some(Reporter::Template {
                key: "missing_recipients",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_senders",
            check_sql: "SELECT pm.id_pm, pm.id_member_from
                FROM personal_messages AS pm
                LEFT JOIN members AS mem ON mem.id_member = pm.id_member_from
                WHERE mem.id_member IS NULL AND pm.id_member_from != 0
                    AND pm.id_pm >= :low AND pm.id_pm < :high
                ORDER BY pm.id_pm",
            check: CheckKind::RowSet {
                columns: &["id_pm", "id_member_from"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_pm) FROM personal_messages",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_pm",
                apply: make_guest_pms,
            },
            report: Some(Reporter::Template {
                key: "missing_senders",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_cached_subject",
            check_sql: UNCACHED_SUBJECT_SQL,
            check: CheckKind::RowSet {
                columns: &["id_topic", "subject"],
            },
            chunk: Some(ChunkSpec {
                step: SUBJECT_STEP,
                max_id_sql: MAX_TOPIC,
            }),
            fix: FixStrategy::CursorStream {
                fetch_sql: UNCACHED_SUBJECT_SQL,
                apply: rebuild_subject_cache,
            },
            report: Some(Reporter::Function(report_uncached_subject)),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_topic_for_cache",
            check_sql: "SELECT lss.id_topic, COUNT(*) AS num_words
                FROM log_search_subjects AS lss
                LEFT JOIN topics AS t ON t.id_topic = lss.id_topic
                WHERE t.id_topic IS NULL
                    AND lss.id_topic >= :low AND lss.id_topic < :high
                GROUP BY lss.id_topic
                ORDER BY lss.id_topic",
            check: CheckKind::RowSet {
                columns: &["id_topic", "num_words"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_topic) FROM log_search_subjects",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_topic",
                apply: delete_cached_subjects_by_topic,
            },
            report: Some(Reporter::Template {
                key: "missing_topic_for_cache",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_member_vote",
            check_sql: "SELECT lp.id_member
                FROM log_polls AS lp
                LEFT JOIN members AS mem ON mem.id_member = lp.id_member
                WHERE mem.id_member IS NULL AND lp.id_member != 0
                    AND lp.id_member >= :low AND lp.id_member < :high
                GROUP BY lp.id_member
                ORDER BY lp.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_member) FROM log_polls",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_member",
                apply: delete_votes_by_member,
            },
            report: Some(Reporter::Template {
                key: "missing_member_vote",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "missing_log_poll_vote",
            check_sql: "SELECT lp.id_poll
                FROM log_polls AS lp
                LEFT JOIN polls AS p ON p.id_poll = lp.id_poll
                WHERE p.id_poll IS NULL
                    AND lp.id_poll >= :low AND lp.id_poll < :high
                GROUP BY lp.id_poll
                ORDER BY lp.id_poll",
            check: CheckKind::RowSet {
                columns: &["id_poll"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_poll) FROM log_polls",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_poll",
                apply: delete_votes_by_poll,
            },
            report: Some(Reporter::Template {
                key: "missing_log_poll_vote",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "report_missing_comments",
            check_sql: "SELECT lr.id_report, lr.subject
                FROM log_reported AS lr
                LEFT JOIN log_reported_comments AS lrc ON lrc.id_report = lr.id_report
                WHERE lrc.id_report IS NULL
                    AND lr.id_report >= :low AND lr.id_report < :high
                ORDER BY lr.id_report",
            check: CheckKind::RowSet {
                columns: &["id_report", "subject"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_report) FROM log_reported",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_report",
                apply: delete_reports_without_comments,
            },
            report: Some(Reporter::Template {
                key: "report_missing_comments",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "comments_missing_report",
            check_sql: "SELECT lrc.id_comment, lrc.id_member
                FROM log_reported_comments AS lrc
                LEFT JOIN log_reported AS lr ON lr.id_report = lrc.id_report
                WHERE lr.id_report IS NULL
                    AND lrc.id_report >= :low AND lrc.id_report < :high
                ORDER BY lrc.id_comment",
            check: CheckKind::RowSet {
                columns: &["id_comment", "id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_report) FROM log_reported_comments",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_comment",
                apply: delete_report_comments,
            },
            report: Some(Reporter::Template {
                key: "comments_missing_report",
                args: &[0, 1],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "group_request_missing_member",
            check_sql: "SELECT lgr.id_member
                FROM log_group_requests AS lgr
                LEFT JOIN members AS mem ON mem.id_member = lgr.id_member
                WHERE mem.id_member IS NULL
                    AND lgr.id_member >= :low AND lgr.id_member < :high
                GROUP BY lgr.id_member
                ORDER BY lgr.id_member",
            check: CheckKind::RowSet {
                columns: &["id_member"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_member) FROM log_group_requests",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_member",
                apply: delete_group_requests_by_member,
            },
            report: Some(Reporter::Template {
                key: "group_request_missing_member",
                args: &[0],
            }),
            cascades_to: &[],
        },
        RuleDefinition {
            id: "group_request_missing_group",
            check_sql: "SELECT lgr.id_group
                FROM log_group_requests AS lgr
                LEFT JOIN membergroups AS mg ON mg.id_group = lgr.id_group
                WHERE mg.id_group IS NULL
                    AND lgr.id_group >= :low AND lgr.id_group < :high
                GROUP BY lgr.id_group
                ORDER BY lgr.id_group",
            check: CheckKind::RowSet {
                columns: &["id_group"],
            },
            chunk: Some(ChunkSpec {
                step: LOG_STEP,
                max_id_sql: "SELECT MAX(id_group) FROM log_group_requests",
            }),
            fix: FixStrategy::BatchCollect {
                key_column: "id_group",
                apply: delete_group_requests_by_group,
            },
            report: Some(Reporter::Template {
                key: "group_request_missing_group",
                args: &[0],
            }),
            cascades_to: &[],
        },
    ]
}

// Topic statistics. The last message prefers the newest approved post.

const TOPIC_BOUNDS_SQL: &str = "SELECT t.id_topic, t.id_first_msg, t.id_last_msg,
        MIN(m.id_msg) AS real_first_msg,
        COALESCE(MAX(CASE WHEN m.approved = 1 THEN m.id_msg END), MAX(m.id_msg)) AS real_last_msg
    FROM topics AS t
    INNER JOIN messages AS m ON m.id_topic = t.id_topic
    WHERE t.id_topic >= :low AND t.id_topic < :high
    GROUP BY t.id_topic, t.id_first_msg, t.id_last_msg
    HAVING t.id_first_msg != MIN(m.id_msg)
        OR t.id_last_msg != COALESCE(MAX(CASE WHEN m.approved = 1 THEN m.id_msg END), MAX(m.id_msg))
    ORDER BY t.id_topic";

const TOPIC_BOUNDS_COLUMNS: &[&str] = &[
    "id_topic",
    "id_first_msg",
    "id_last_msg",
    "real_first_msg",
    "real_last_msg",
];

// Replies are approved posts other than the opening post. An unapproved
// opening post is not among the approved ones, so nothing is subtracted.
const TOPIC_REPLIES_SQL: &str = "SELECT t.id_topic, t.num_replies,
        COUNT(ma.id_msg) - CASE WHEN mf.approved = 1 THEN 1 ELSE 0 END AS real_num_replies
    FROM topics AS t
    LEFT JOIN messages AS mf ON mf.id_msg = t.id_first_msg AND mf.id_topic = t.id_topic
    LEFT JOIN messages AS ma ON ma.id_topic = t.id_topic AND ma.approved = 1
    WHERE t.id_topic >= :low AND t.id_topic < :high
    GROUP BY t.id_topic, t.num_replies, mf.approved
    HAVING t.num_replies != COUNT(ma.id_msg) - CASE WHEN mf.approved = 1 THEN 1 ELSE 0 END
    ORDER BY t.id_topic";

const TOPIC_REPLIES_COLUMNS: &[&str] = &["id_topic", "num_replies", "real_num_replies"];

const TOPIC_UNAPPROVED_SQL: &str = "SELECT t.id_topic, t.unapproved_posts,
        COUNT(mu.id_msg) AS real_unapproved_posts
    FROM topics AS t
    LEFT JOIN messages AS mu ON mu.id_topic = t.id_topic AND mu.approved = 0
    WHERE t.id_topic >= :low AND t.id_topic < :high
    GROUP BY t.id_topic, t.unapproved_posts
    HAVING t.unapproved_posts != COUNT(mu.id_msg)
    ORDER BY t.id_topic";

const TOPIC_UNAPPROVED_COLUMNS: &[&str] = &["id_topic", "unapproved_posts", "real_unapproved_posts"];

const UNCACHED_SUBJECT_SQL: &str = "SELECT t.id_topic, fm.subject
    FROM topics AS t
    INNER JOIN messages AS fm ON fm.id_msg = t.id_first_msg
    LEFT JOIN log_search_subjects AS lss ON lss.id_topic = t.id_topic
    WHERE t.id_topic >= :low AND t.id_topic < :high
    GROUP BY t.id_topic, fm.subject
    HAVING COUNT(lss.id_topic) = 0
    ORDER BY t.id_topic";

fn changed(rows: usize) -> Applied {
    if rows > 0 {
        Applied::Applied
    } else {
        Applied::Skipped
    }
}

fn renumber_zero_topic(ctx: &mut FixContext<'_>, _row: &FetchedRow) -> Result<Applied> {
    let next_id = ctx
        .query_i64("SELECT COALESCE(MAX(id_topic), 0) + 1 FROM topics", [])?
        .unwrap_or(1);
    let moved = ctx.execute(
        "UPDATE topics SET id_topic = ?1 WHERE id_topic = 0",
        params![next_id],
    )?;
    if moved == 0 {
        return Ok(Applied::Skipped);
    }
    ctx.execute(
        "UPDATE messages SET id_topic = ?1 WHERE id_topic = 0",
        params![next_id],
    )?;
    Ok(Applied::Applied)
}

/// Messages sharing one missing topic id, as fetched for regrouping
struct OrphanedMessages {
    id_topic: i64,
    id_board: i64,
    first_msg: i64,
    last_msg: i64,
    approved: i64,
    unapproved: i64,
}

impl OrphanedMessages {
    fn from_row(row: &FetchedRow) -> Result<Self> {
        Ok(Self {
            id_topic: row.int(0)?,
            id_board: row.int(1)?,
            first_msg: row.int(2)?,
            last_msg: row.int(3)?,
            approved: row.int(4)?,
            unapproved: row.int(5)?,
        })
    }
}

fn regroup_orphaned_messages(ctx: &mut FixContext<'_>, row: &FetchedRow) -> Result<Applied> {
    let orphans = OrphanedMessages::from_row(row)?;
    let id_board = if orphans.id_board == 0 {
        ctx.salvage_board()?
    } else {
        orphans.id_board
    };
    let starter = ctx
        .query_i64(
            "SELECT id_member FROM messages WHERE id_msg = ?1",
            params![orphans.first_msg],
        )?
        .unwrap_or(0);
    let opener_approved = ctx
        .query_i64(
            "SELECT approved FROM messages WHERE id_msg = ?1",
            params![orphans.first_msg],
        )?
        .unwrap_or(0)
        == 1;
    let replies = if opener_approved {
        (orphans.approved - 1).max(0)
    } else {
        orphans.approved
    };

    let new_topic = ctx.insert(
        "INSERT INTO topics
            (id_board, id_first_msg, id_last_msg, id_member_started, num_replies, unapproved_posts, approved)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![
            id_board,
            orphans.first_msg,
            orphans.last_msg,
            starter,
            replies,
            orphans.unapproved
        ],
    )?;
    let moved = ctx.execute(
        "UPDATE messages SET id_topic = ?1, id_board = ?2 WHERE id_topic = ?3",
        params![new_topic, id_board, orphans.id_topic],
    )?;
    if moved == 0 {
        // Another run regrouped them first.
        ctx.execute("DELETE FROM topics WHERE id_topic = ?1", params![new_topic])?;
        return Ok(Applied::Skipped);
    }
    tracing::info!(
        old_topic = orphans.id_topic,
        new_topic,
        id_board,
        messages = moved,
        "regrouped orphaned messages"
    );
    Ok(Applied::Applied)
}

fn delete_empty_topics(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids(
        "DELETE FROM topics WHERE id_topic IN ({ids})
            AND NOT EXISTS (SELECT 1 FROM messages AS m WHERE m.id_topic = topics.id_topic)",
        ids,
    )
}

fn salvage_orphaned_poll(ctx: &mut FixContext<'_>, row: &FetchedRow) -> Result<Applied> {
    let id_poll = row.int(0)?;
    let id_member = row.int(1)?;
    let poster_name = row.text(2)?;
    let question = row.text(3)?;

    let attached = ctx
        .query_i64(
            "SELECT COUNT(*) FROM topics WHERE id_poll = ?1",
            params![id_poll],
        )?
        .unwrap_or(0);
    if attached > 0 {
        return Ok(Applied::Skipped);
    }

    let id_board = ctx.salvage_board()?;
    let subject = if question.trim().is_empty() {
        ctx.text("salvaged_poll_topic_name")
    } else {
        question
    };
    let body = ctx.text("salvaged_poll_message_body");

    // Topic first so the message is never topicless. A half-done salvage
    // leaves an empty topic (missing_messages) or stale bounds (stats_topics).
    let id_topic = ctx.insert(
        "INSERT INTO topics (id_board, id_member_started, id_poll, num_replies, approved)
         VALUES (?1, ?2, ?3, 0, 1)",
        params![id_board, id_member, id_poll],
    )?;
    let id_msg = ctx.insert(
        "INSERT INTO messages (id_topic, id_board, id_member, poster_name, subject, body, approved)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![id_topic, id_board, id_member, poster_name, subject, body],
    )?;
    ctx.execute(
        "UPDATE topics SET id_first_msg = ?1, id_last_msg = ?1 WHERE id_topic = ?2",
        params![id_msg, id_topic],
    )?;
    Ok(Applied::Applied)
}

fn delete_orphaned_poll_choices(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids(
        "DELETE FROM poll_choices WHERE id_poll IN ({ids})
            AND NOT EXISTS (SELECT 1 FROM polls AS p WHERE p.id_poll = poll_choices.id_poll)",
        ids,
    )
}

fn fix_topic_bounds(ctx: &mut FixContext<'_>, row: &FetchedRow) -> Result<Applied> {
    let id_topic = row.int(0)?;
    let first = row.int(3)?;
    let last = row.int(4)?;
    let rows = ctx.execute(
        "UPDATE topics SET id_first_msg = ?1, id_last_msg = ?2
         WHERE id_topic = ?3 AND (id_first_msg != ?1 OR id_last_msg != ?2)",
        params![first, last, id_topic],
    )?;
    Ok(changed(rows))
}

fn fix_topic_replies(ctx: &mut FixContext<'_>, row: &FetchedRow) -> Result<Applied> {
    let id_topic = row.int(0)?;
    let replies = row.int(2)?;
    let rows = ctx.execute(
        "UPDATE topics SET num_replies = ?1 WHERE id_topic = ?2 AND num_replies != ?1",
        params![replies, id_topic],
    )?;
    Ok(changed(rows))
}

fn fix_topic_unapproved(ctx: &mut FixContext<'_>, row: &FetchedRow) -> Result<Applied> {
    let id_topic = row.int(0)?;
    let unapproved = row.int(2)?;
    let rows = ctx.execute(
        "UPDATE topics SET unapproved_posts = ?1 WHERE id_topic = ?2 AND unapproved_posts != ?1",
        params![unapproved, id_topic],
    )?;
    Ok(changed(rows))
}

fn rehome_board_topics(ctx: &mut FixContext<'_>, row: &FetchedRow) -> Result<Applied> {
    let missing_board = row.int(0)?;
    let salvage_board = ctx.salvage_board()?;
    ctx.execute(
        "UPDATE messages SET id_board = ?1 WHERE id_board = ?2",
        params![salvage_board, missing_board],
    )?;
    let topics = ctx.execute(
        "UPDATE topics SET id_board = ?1 WHERE id_board = ?2",
        params![salvage_board, missing_board],
    )?;
    if topics > 0 {
        tracing::info!(missing_board, salvage_board, topics, "moved topics to salvage board");
    }
    Ok(changed(topics))
}

fn move_boards_to_salvage_category(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    let id_cat = ctx.salvage_category()?;
    ctx.execute_for_ids(
        &format!(
            "UPDATE boards SET id_cat = {id_cat} WHERE id_board IN ({{ids}})
                AND NOT EXISTS (SELECT 1 FROM categories AS c WHERE c.id_cat = boards.id_cat)"
        ),
        ids,
    )
}

fn make_guest_messages(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("UPDATE messages SET id_member = 0 WHERE id_msg IN ({ids})", ids)
}

fn detach_orphaned_child_boards(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    let id_cat = ctx.salvage_category()?;
    ctx.execute_for_ids(
        &format!(
            "UPDATE boards SET id_parent = 0, child_level = 0, id_cat = {id_cat}
             WHERE id_board IN ({{ids}})
                AND NOT EXISTS (SELECT 1 FROM boards AS p WHERE p.id_board = boards.id_parent)"
        ),
        ids,
    )
}

fn delete_log_topics_by_topic(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_topics WHERE id_topic IN ({ids})", ids)
}

fn delete_log_topics_by_member(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_topics WHERE id_member IN ({ids})", ids)
}

fn delete_log_boards_by_board(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_boards WHERE id_board IN ({ids})", ids)
}

fn delete_log_boards_by_member(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_boards WHERE id_member IN ({ids})", ids)
}

fn delete_mark_read_by_board(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_mark_read WHERE id_board IN ({ids})", ids)
}

fn delete_notify_by_member(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_notify WHERE id_member IN ({ids})", ids)
}

fn delete_recipients_by_pm(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM pm_recipients WHERE id_pm IN ({ids})", ids)
}

fn delete_recipients_by_member(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM pm_recipients WHERE id_member IN ({ids})", ids)
}

fn make_guest_pms(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids(
        "UPDATE personal_messages SET id_member_from = 0 WHERE id_pm IN ({ids})",
        ids,
    )
}

fn report_uncached_subject(ctx: &ReportContext<'_>, row: &FetchedRow) -> Result<Option<String>> {
    let subject = row.text(1)?;
    if ctx.tokenizer.words(&subject).is_empty() {
        return Ok(None);
    }
    Ok(Some(
        ctx.localizer
            .render("missing_cached_subject", &[row.display(0)]),
    ))
}

fn rebuild_subject_cache(ctx: &mut FixContext<'_>, rows: &mut rusqlite::Rows<'_>) -> Result<usize> {
    let batch_size = ctx.batch_size();
    let mut pending: Vec<(String, i64)> = Vec::with_capacity(batch_size);
    let mut inserted = 0;

    while let Some(row) = rows.next()? {
        let id_topic: i64 = row.get(0)?;
        let subject: String = row.get(1)?;
        for word in ctx.words(&subject) {
            pending.push((word, id_topic));
            if pending.len() >= batch_size {
                inserted += flush_subject_words(ctx, &mut pending)?;
            }
        }
    }
    inserted += flush_subject_words(ctx, &mut pending)?;
    Ok(inserted)
}

fn flush_subject_words(ctx: &mut FixContext<'_>, pending: &mut Vec<(String, i64)>) -> Result<usize> {
    if pending.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "INSERT OR IGNORE INTO log_search_subjects (word, id_topic) VALUES {}",
        vec!["(?, ?)"; pending.len()].join(", ")
    );
    let values: Vec<Value> = pending
        .drain(..)
        .flat_map(|(word, id_topic)| [Value::Text(word), Value::Integer(id_topic)])
        .collect();
    ctx.execute(&sql, rusqlite::params_from_iter(values))
}

fn delete_cached_subjects_by_topic(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_search_subjects WHERE id_topic IN ({ids})", ids)
}

fn delete_votes_by_member(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_polls WHERE id_member IN ({ids})", ids)
}

fn delete_votes_by_poll(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_polls WHERE id_poll IN ({ids})", ids)
}

fn delete_reports_without_comments(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids(
        "DELETE FROM log_reported WHERE id_report IN ({ids})
            AND NOT EXISTS (SELECT 1 FROM log_reported_comments AS lrc
                            WHERE lrc.id_report = log_reported.id_report)",
        ids,
    )
}

fn delete_report_comments(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids(
        "DELETE FROM log_reported_comments WHERE id_comment IN ({ids})",
        ids,
    )
}

fn delete_group_requests_by_member(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_group_requests WHERE id_member IN ({ids})", ids)
}

fn delete_group_requests_by_group(ctx: &mut FixContext<'_>, ids: &[i64]) -> Result<usize> {
    ctx.execute_for_ids("DELETE FROM log_group_requests WHERE id_group IN ({ids})", ids)
}
