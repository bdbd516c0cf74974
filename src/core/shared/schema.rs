diesel::table! {
    tenants (id) {
        id -> Uuid,
        name -> Text,
        slug -> Text,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        username -> Text,
        email -> Text,
        role -> Text,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    vendors (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Text,
        contact_email -> Nullable<Text>,
        compliance_score -> Nullable<Int4>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    agents (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        vendor_id -> Nullable<Uuid>,
        name -> Text,
        description -> Nullable<Text>,
        agent_type -> Text,
        status -> Text,
        compliance_score -> Nullable<Int4>,
        submitted_by -> Nullable<Uuid>,
        submitted_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    assessments (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Text,
        description -> Nullable<Text>,
        owner_id -> Uuid,
        team_ids -> Array<Uuid>,
        schedule -> Nullable<Jsonb>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    question_library (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        question_type -> Text,
        question_text -> Text,
        section -> Nullable<Text>,
        is_required -> Bool,
        validation -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    assessment_questions (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        assessment_id -> Uuid,
        question_type -> Text,
        question_text -> Text,
        section -> Nullable<Text>,
        sort_order -> Int4,
        is_required -> Bool,
        requirement_id -> Nullable<Uuid>,
        validation -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    assessment_assignments (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        assessment_id -> Uuid,
        vendor_id -> Nullable<Uuid>,
        agent_id -> Nullable<Uuid>,
        assigned_to -> Nullable<Uuid>,
        assigned_by -> Uuid,
        status -> Text,
        workflow_ticket_id -> Nullable<Text>,
        due_date -> Nullable<Timestamptz>,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    assessment_question_responses (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        assignment_id -> Uuid,
        question_id -> Uuid,
        value -> Nullable<Text>,
        comment -> Nullable<Text>,
        documents -> Jsonb,
        responded_by -> Nullable<Uuid>,
        ai_evaluation -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    assessment_question_reviews (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        assignment_id -> Uuid,
        question_id -> Uuid,
        status -> Text,
        comment -> Nullable<Text>,
        reviewed_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    submission_requirement_responses (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        agent_id -> Uuid,
        requirement_id -> Uuid,
        value -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_instances (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        assignment_id -> Uuid,
        status -> Text,
        current_step -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_steps (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        instance_id -> Uuid,
        step_number -> Int4,
        step_name -> Text,
        status -> Text,
        assigned_to -> Nullable<Uuid>,
        assigned_role -> Nullable<Text>,
        decision -> Nullable<Text>,
        comment -> Nullable<Text>,
        acted_by -> Nullable<Uuid>,
        acted_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    action_items (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        title -> Text,
        description -> Nullable<Text>,
        action_type -> Text,
        source_type -> Text,
        source_id -> Uuid,
        assigned_to -> Uuid,
        assigned_role -> Nullable<Text>,
        status -> Text,
        priority -> Text,
        workflow_ticket_id -> Nullable<Text>,
        payload -> Jsonb,
        due_date -> Nullable<Timestamptz>,
        assigned_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    onboarding_requests (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        agent_id -> Uuid,
        status -> Text,
        current_step -> Int4,
        workflow_steps -> Jsonb,
        assigned_to -> Nullable<Uuid>,
        requested_by -> Uuid,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    workflow_configurations (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Text,
        request_type -> Text,
        workflow_steps -> Jsonb,
        is_default -> Bool,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    process_mappings (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        request_type -> Text,
        workflow_configuration_id -> Nullable<Uuid>,
        stage_mappings -> Jsonb,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    form_layouts (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Text,
        request_type -> Text,
        layout_type -> Text,
        agent_type -> Nullable<Text>,
        sections -> Jsonb,
        is_default -> Bool,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    custom_fields (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        field_key -> Text,
        label -> Text,
        field_type -> Text,
        options -> Nullable<Jsonb>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    support_tickets (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        ticket_number -> Text,
        subject -> Text,
        description -> Nullable<Text>,
        status -> Text,
        priority -> Text,
        requester_id -> Nullable<Uuid>,
        assignee_id -> Nullable<Uuid>,
        due_date -> Nullable<Timestamptz>,
        resolved_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        sender_id -> Nullable<Uuid>,
        recipient_id -> Nullable<Uuid>,
        resource_type -> Nullable<Text>,
        resource_id -> Nullable<Uuid>,
        subject -> Text,
        body -> Text,
        is_public -> Bool,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    assessment_workflow_history (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        assignment_id -> Uuid,
        from_status -> Nullable<Text>,
        to_status -> Text,
        actor_id -> Nullable<Uuid>,
        comment -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    audit_log (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        actor_id -> Nullable<Uuid>,
        action -> Text,
        entity_type -> Text,
        entity_id -> Nullable<Uuid>,
        detail -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_jobs (id) {
        id -> Uuid,
        tenant_id -> Nullable<Uuid>,
        kind -> Text,
        payload -> Jsonb,
        status -> Text,
        attempts -> Int4,
        last_error -> Nullable<Text>,
        scheduled_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    tenants,
    users,
    vendors,
    agents,
    assessments,
    question_library,
    assessment_questions,
    assessment_assignments,
    assessment_question_responses,
    assessment_question_reviews,
    submission_requirement_responses,
    approval_instances,
    approval_steps,
    action_items,
    onboarding_requests,
    workflow_configurations,
    process_mappings,
    form_layouts,
    custom_fields,
    support_tickets,
    messages,
    assessment_workflow_history,
    audit_log,
    outbox_jobs,
);
